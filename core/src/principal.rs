//! Owner and group resolution. Versions record principal NAMES rather
//! than numeric ids so an archive restored on a machine with a different
//! passwd database still maps to the right principal when it exists.

#[cfg(unix)]
use std::collections::HashMap;
#[cfg(unix)]
use std::sync::{Mutex, OnceLock};

#[cfg(unix)]
static UID_NAMES: OnceLock<Mutex<HashMap<u32, String>>> = OnceLock::new();
#[cfg(unix)]
static GID_NAMES: OnceLock<Mutex<HashMap<u32, String>>> = OnceLock::new();

/// Name for a uid on this system, falling back to the numeric string when
/// the uid has no passwd entry. Lookups are cached for the process.
#[cfg(unix)]
pub fn user_name(uid: u32) -> String {
    let cache = UID_NAMES.get_or_init(Default::default);
    if let Some(name) = cache.lock().unwrap().get(&uid) {
        return name.clone();
    }
    let name = nix::unistd::User::from_uid(nix::unistd::Uid::from_raw(uid))
        .ok()
        .flatten()
        .map(|user| user.name)
        .unwrap_or_else(|| uid.to_string());
    cache.lock().unwrap().insert(uid, name.clone());
    name
}

#[cfg(unix)]
pub fn group_name(gid: u32) -> String {
    let cache = GID_NAMES.get_or_init(Default::default);
    if let Some(name) = cache.lock().unwrap().get(&gid) {
        return name.clone();
    }
    let name = nix::unistd::Group::from_gid(nix::unistd::Gid::from_raw(gid))
        .ok()
        .flatten()
        .map(|group| group.name)
        .unwrap_or_else(|| gid.to_string());
    cache.lock().unwrap().insert(gid, name.clone());
    name
}

/// Uid for a recorded owner name on this system. Numeric strings (written
/// when the originating system could not resolve the id) map straight
/// back to the number.
#[cfg(unix)]
pub fn uid_for(name: &str) -> Option<u32> {
    if let Ok(user) = nix::unistd::User::from_name(name) {
        if let Some(user) = user {
            return Some(user.uid.as_raw());
        }
    }
    name.parse().ok()
}

#[cfg(unix)]
pub fn gid_for(name: &str) -> Option<u32> {
    if let Ok(group) = nix::unistd::Group::from_name(name) {
        if let Some(group) = group {
            return Some(group.gid.as_raw());
        }
    }
    name.parse().ok()
}

#[cfg(not(unix))]
pub fn user_name(uid: u32) -> String {
    uid.to_string()
}

#[cfg(not(unix))]
pub fn group_name(gid: u32) -> String {
    gid.to_string()
}

#[cfg(not(unix))]
pub fn uid_for(name: &str) -> Option<u32> {
    name.parse().ok()
}

#[cfg(not(unix))]
pub fn gid_for(name: &str) -> Option<u32> {
    name.parse().ok()
}
