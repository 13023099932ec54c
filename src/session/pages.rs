//! Logical page registry of one session.

use crate::error::{AutomationError, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Active,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page {
    pub id: Uuid,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver_page_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opener_id: Option<Uuid>,
    pub is_initial: bool,
    pub status: PageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip)]
    ordinal: u64,
}

impl Page {
    pub fn is_open(&self) -> bool {
        self.status == PageStatus::Active
    }
}

#[derive(Debug)]
struct Inner {
    pages: HashMap<Uuid, Page>,
    active_id: Option<Uuid>,
    initial_id: Uuid,
    by_driver_id: HashMap<String, Uuid>,
    next_ordinal: u64,
}

impl Inner {
    fn page_mut(&mut self, id: Uuid) -> Result<&mut Page> {
        self.pages
            .get_mut(&id)
            .ok_or_else(|| AutomationError::Validation(format!("page {} not found", id)))
    }

    fn insert(&mut self, url: String, opener_id: Option<Uuid>, is_initial: bool) -> Uuid {
        let now = Utc::now();
        let id = Uuid::new_v4();
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        self.pages.insert(
            id,
            Page {
                id,
                url,
                title: None,
                driver_page_id: None,
                opener_id,
                is_initial,
                status: PageStatus::Active,
                created_at: now,
                updated_at: now,
                ordinal,
            },
        );
        id
    }

    fn unmap(&mut self, id: Uuid) {
        if let Some(page) = self.pages.get_mut(&id) {
            if let Some(driver_id) = page.driver_page_id.take() {
                self.by_driver_id.remove(&driver_id);
            }
        }
    }

    fn first_open(&self) -> Option<Uuid> {
        self.pages
            .values()
            .filter(|p| p.is_open())
            .min_by_key(|p| (p.created_at, p.ordinal))
            .map(|p| p.id)
    }
}

/// Tracks pages of a session and which one is active. The driver's page
/// ids and logical ids are kept in a bidirectional mapping.
#[derive(Debug)]
pub struct PageTracker {
    session_id: String,
    inner: RwLock<Inner>,
}

impl PageTracker {
    pub fn new(session_id: impl Into<String>, initial_url: impl Into<String>) -> Self {
        let mut inner = Inner {
            pages: HashMap::new(),
            active_id: None,
            initial_id: Uuid::nil(),
            by_driver_id: HashMap::new(),
            next_ordinal: 0,
        };
        let initial = inner.insert(initial_url.into(), None, true);
        inner.initial_id = initial;
        inner.active_id = Some(initial);
        Self {
            session_id: session_id.into(),
            inner: RwLock::new(inner),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn initial_page_id(&self) -> Uuid {
        self.inner.read().initial_id
    }

    pub fn add_page(&self, url: impl Into<String>, opener_id: Option<Uuid>) -> Uuid {
        let id = self.inner.write().insert(url.into(), opener_id, false);
        tracing::debug!("Session {} opened page {}", self.session_id, id);
        id
    }

    pub fn get_page(&self, id: Uuid) -> Option<Page> {
        self.inner.read().pages.get(&id).cloned()
    }

    pub fn active_page_id(&self) -> Option<Uuid> {
        self.inner.read().active_id
    }

    pub fn active_page(&self) -> Option<Page> {
        let inner = self.inner.read();
        inner.active_id.and_then(|id| inner.pages.get(&id).cloned())
    }

    pub fn set_active_page(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.write();
        let page = inner.page_mut(id)?;
        if !page.is_open() {
            return Err(AutomationError::Validation(format!("page {} is closed", id)));
        }
        inner.active_id = Some(id);
        Ok(())
    }

    /// Close a page. Closing the active page activates the oldest open page.
    pub fn close_page(&self, id: Uuid) -> Result<()> {
        let mut inner = self.inner.write();
        let page = inner.page_mut(id)?;
        page.status = PageStatus::Closed;
        page.updated_at = Utc::now();
        inner.unmap(id);
        if inner.active_id == Some(id) {
            inner.active_id = inner.first_open();
        }
        Ok(())
    }

    pub fn update_page_info(&self, id: Uuid, url: Option<String>, title: Option<String>) -> Result<()> {
        let mut inner = self.inner.write();
        let page = inner.page_mut(id)?;
        if let Some(url) = url {
            page.url = url;
        }
        if title.is_some() {
            page.title = title;
        }
        page.updated_at = Utc::now();
        Ok(())
    }

    /// Bind a driver page id to a logical page, replacing any earlier binding
    /// of either side.
    pub fn map_driver_page_id(&self, id: Uuid, driver_page_id: impl Into<String>) -> Result<()> {
        let driver_page_id = driver_page_id.into();
        let mut inner = self.inner.write();
        inner.page_mut(id)?;
        if let Some(previous) = inner.by_driver_id.get(&driver_page_id).copied() {
            inner.unmap(previous);
        }
        inner.unmap(id);
        inner.by_driver_id.insert(driver_page_id.clone(), id);
        inner.page_mut(id)?.driver_page_id = Some(driver_page_id);
        Ok(())
    }

    pub fn get_page_id_by_driver_id(&self, driver_page_id: &str) -> Option<Uuid> {
        self.inner.read().by_driver_id.get(driver_page_id).copied()
    }

    /// Logical id of the page that opened `id`, if it is still tracked.
    pub fn find_opener_page_id(&self, id: Uuid) -> Option<Uuid> {
        let inner = self.inner.read();
        let opener = inner.pages.get(&id)?.opener_id?;
        inner.pages.contains_key(&opener).then_some(opener)
    }

    /// All pages ordered by creation.
    pub fn list_pages(&self) -> Vec<Page> {
        let inner = self.inner.read();
        let mut pages: Vec<Page> = inner.pages.values().cloned().collect();
        pages.sort_by_key(|p| (p.created_at, p.ordinal));
        pages
    }

    pub fn open_count(&self) -> usize {
        self.inner.read().pages.values().filter(|p| p.is_open()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_page_is_active() {
        let tracker = PageTracker::new("s1", "about:blank");
        let initial = tracker.initial_page_id();
        let page = tracker.active_page().unwrap();
        assert_eq!(page.id, initial);
        assert!(page.is_initial);
        assert_eq!(page.status, PageStatus::Active);
        assert_eq!(tracker.open_count(), 1);
    }

    #[test]
    fn test_closing_active_page_transfers_to_oldest_open() {
        let tracker = PageTracker::new("s1", "https://example.com");
        let initial = tracker.initial_page_id();
        let second = tracker.add_page("https://example.com/a", Some(initial));
        let third = tracker.add_page("https://example.com/b", Some(second));

        tracker.set_active_page(third).unwrap();
        tracker.close_page(third).unwrap();
        assert_eq!(tracker.active_page_id(), Some(initial));

        tracker.close_page(initial).unwrap();
        assert_eq!(tracker.active_page_id(), Some(second));

        tracker.close_page(second).unwrap();
        assert_eq!(tracker.active_page_id(), None);
        assert!(tracker.set_active_page(second).is_err());
    }

    #[test]
    fn test_driver_mapping_stays_in_lockstep() {
        let tracker = PageTracker::new("s1", "about:blank");
        let initial = tracker.initial_page_id();
        let other = tracker.add_page("about:blank", None);

        tracker.map_driver_page_id(initial, "T1").unwrap();
        assert_eq!(tracker.get_page_id_by_driver_id("T1"), Some(initial));

        tracker.map_driver_page_id(other, "T1").unwrap();
        assert_eq!(tracker.get_page_id_by_driver_id("T1"), Some(other));
        assert!(tracker.get_page(initial).unwrap().driver_page_id.is_none());

        tracker.map_driver_page_id(other, "T2").unwrap();
        assert_eq!(tracker.get_page_id_by_driver_id("T1"), None);

        tracker.close_page(other).unwrap();
        assert_eq!(tracker.get_page_id_by_driver_id("T2"), None);
    }

    #[test]
    fn test_opener_and_listing_order() {
        let tracker = PageTracker::new("s1", "about:blank");
        let initial = tracker.initial_page_id();
        let popup = tracker.add_page("https://popup.example", Some(initial));
        assert_eq!(tracker.find_opener_page_id(popup), Some(initial));
        assert_eq!(tracker.find_opener_page_id(initial), None);

        tracker
            .update_page_info(popup, Some("https://popup.example/x".into()), Some("Popup".into()))
            .unwrap();
        let pages = tracker.list_pages();
        assert_eq!(pages[0].id, initial);
        assert_eq!(pages[1].title.as_deref(), Some("Popup"));
    }
}
