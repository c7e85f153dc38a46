//! In-memory fetcher for tests

use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use chrono::{TimeZone, Utc};

use super::Fetcher;
use crate::models::{EmailAddress, NewEmail, NewEmailBuilder};

/// Envelope builder with a fixed sender and a date that grows with the uid.
pub(crate) fn envelope(uid: u32) -> NewEmailBuilder {
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    NewEmail::builder(uid)
        .subject(format!("Message {}", uid))
        .from(EmailAddress::with_name("Sender", "sender@example.com"))
        .snippet(format!("snippet {}", uid))
        .date(base + chrono::Duration::minutes(uid as i64))
}

#[derive(Default)]
pub(crate) struct FakeFetcher {
    folders: Mutex<BTreeMap<String, BTreeMap<u32, NewEmail>>>,
    bodies: Mutex<BTreeMap<(String, u32), String>>,
    listing_error: Mutex<Option<String>>,
    body_error: Mutex<Option<String>>,
}

impl FakeFetcher {
    pub(crate) fn put(&self, folder: &str, email: NewEmail) {
        self.folders
            .lock()
            .unwrap()
            .entry(folder.to_string())
            .or_default()
            .insert(email.uid, email);
    }

    pub(crate) fn remove(&self, folder: &str, uid: u32) {
        if let Some(f) = self.folders.lock().unwrap().get_mut(folder) {
            f.remove(&uid);
        }
    }

    pub(crate) fn put_body(&self, folder: &str, uid: u32, text: &str) {
        self.bodies
            .lock()
            .unwrap()
            .insert((folder.to_string(), uid), text.to_string());
    }

    pub(crate) fn fail_listing(&self, message: &str) {
        *self.listing_error.lock().unwrap() = Some(message.to_string());
    }

    pub(crate) fn fail_bodies(&self, message: &str) {
        *self.body_error.lock().unwrap() = Some(message.to_string());
    }
}

impl Fetcher for FakeFetcher {
    fn list_remote_uids(&self, folder: &str) -> Result<Option<Vec<u32>>> {
        if let Some(msg) = self.listing_error.lock().unwrap().clone() {
            return Err(anyhow!(msg));
        }
        Ok(self
            .folders
            .lock()
            .unwrap()
            .get(folder)
            .map(|f| f.keys().copied().collect()))
    }

    fn fetch_envelopes(&self, folder: &str, uids: &[u32]) -> Result<Vec<NewEmail>> {
        let folders = self.folders.lock().unwrap();
        let Some(f) = folders.get(folder) else {
            return Ok(Vec::new());
        };
        Ok(uids.iter().filter_map(|uid| f.get(uid).cloned()).collect())
    }

    fn fetch_body_text(&self, folder: &str, uid: u32) -> Result<Option<String>> {
        if let Some(msg) = self.body_error.lock().unwrap().clone() {
            return Err(anyhow!(msg));
        }
        Ok(self
            .bodies
            .lock()
            .unwrap()
            .get(&(folder.to_string(), uid))
            .cloned())
    }
}
