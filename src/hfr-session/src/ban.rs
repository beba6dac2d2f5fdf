// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Ban list (spec §3, §4.6): in-memory map plus a `pickledb`-backed flat
//! file so bans survive a restart, the way `trx-frontend-http` persists its
//! own session/auth state with `pickledb`.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use pickledb::{PickleDb, PickleDbDumpPolicy, SerializationMethod};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BanSource {
    Admin,
    RateLimiter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanEntry {
    pub ip: IpAddr,
    pub reason: String,
    pub source: BanSource,
    /// Unix-epoch seconds; `None` means permanent.
    pub expires_at: Option<u64>,
}

impl BanEntry {
    fn is_expired(&self, now_secs: u64) -> bool {
        matches!(self.expires_at, Some(exp) if exp <= now_secs)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub struct BanList {
    entries: RwLock<HashMap<IpAddr, BanEntry>>,
    db: RwLock<PickleDb>,
}

impl BanList {
    /// Load (or create) the persisted ban file at `path`.
    pub fn open(path: &str) -> Self {
        let db = PickleDb::load(
            path,
            PickleDbDumpPolicy::AutoDump,
            SerializationMethod::Json,
        )
        .unwrap_or_else(|_| {
            PickleDb::new(path, PickleDbDumpPolicy::AutoDump, SerializationMethod::Json)
        });

        let mut entries = HashMap::new();
        for key in db.get_all() {
            if let Some(entry) = db.get::<BanEntry>(&key) {
                entries.insert(entry.ip, entry);
            } else {
                warn!("skipping unreadable ban record for key {key}");
            }
        }

        BanList {
            entries: RwLock::new(entries),
            db: RwLock::new(db),
        }
    }

    /// O(1) ban check (spec §4.6); lazily evicts an expired entry it
    /// encounters rather than relying solely on the sweep timer.
    pub fn is_banned(&self, ip: IpAddr) -> bool {
        let now = now_secs();
        if let Some(entry) = self.entries.read().expect("ban list poisoned").get(&ip) {
            if !entry.is_expired(now) {
                return true;
            }
        } else {
            return false;
        }
        self.unban(ip);
        false
    }

    pub fn ban(&self, ip: IpAddr, reason: String, source: BanSource, ttl_secs: Option<u64>) {
        let entry = BanEntry {
            ip,
            reason,
            source,
            expires_at: ttl_secs.map(|ttl| now_secs() + ttl),
        };
        self.persist(&entry);
        self.entries
            .write()
            .expect("ban list poisoned")
            .insert(ip, entry);
    }

    pub fn unban(&self, ip: IpAddr) -> bool {
        let removed = self
            .entries
            .write()
            .expect("ban list poisoned")
            .remove(&ip)
            .is_some();
        if removed {
            let mut db = self.db.write().expect("ban db poisoned");
            if let Err(e) = db.rem(&ip.to_string()) {
                error!("failed to remove ban record from disk: {e}");
            }
        }
        removed
    }

    pub fn list(&self) -> Vec<BanEntry> {
        self.entries
            .read()
            .expect("ban list poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Timer-driven sweep (spec §5: "bans with expires_at auto-purge on a
    /// timer", 1-hour ticker).
    pub fn purge_expired(&self) {
        let now = now_secs();
        let expired: Vec<IpAddr> = self
            .entries
            .read()
            .expect("ban list poisoned")
            .values()
            .filter(|e| e.is_expired(now))
            .map(|e| e.ip)
            .collect();
        for ip in expired {
            self.unban(ip);
        }
    }

    fn persist(&self, entry: &BanEntry) {
        let mut db = self.db.write().expect("ban db poisoned");
        if let Err(e) = db.set(&entry.ip.to_string(), entry) {
            error!("failed to persist ban record: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn temp_path(name: &str) -> String {
        std::env::temp_dir()
            .join(format!("hfr-test-bans-{name}-{}.json", std::process::id()))
            .to_string_lossy()
            .into_owned()
    }

    #[test]
    fn ban_and_unban_round_trip() {
        let path = temp_path("roundtrip");
        let list = BanList::open(&path);
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5));
        assert!(!list.is_banned(ip));
        list.ban(ip, "abuse".into(), BanSource::Admin, None);
        assert!(list.is_banned(ip));
        assert!(list.unban(ip));
        assert!(!list.is_banned(ip));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn expired_ban_is_purged_lazily() {
        let path = temp_path("expiry");
        let list = BanList::open(&path);
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 6));
        list.ban(ip, "flood".into(), BanSource::RateLimiter, Some(0));
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(!list.is_banned(ip));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn survives_reload_from_disk() {
        let path = temp_path("reload");
        {
            let list = BanList::open(&path);
            list.ban(
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)),
                "perm".into(),
                BanSource::Admin,
                None,
            );
        }
        let reloaded = BanList::open(&path);
        assert!(reloaded.is_banned(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7))));
        let _ = std::fs::remove_file(&path);
    }
}
