use crate::page_id::PageId;
use crate::transaction_id::TransactionId;

/// An in-memory image of one fixed-size disk page.
///
/// Carries its `PageId`, the raw payload, the dirtying transaction (if
/// any) and a `before_image`: a snapshot taken when the page was read
/// from disk (or last committed), used to restore state on abort.
/// `before_image` is refreshed exactly when a transaction commits its
/// changes, i.e. right after `BufferPool::transaction_complete` has
/// flushed the payload through `PageStore::write`.
#[derive(Debug, Clone)]
pub struct Page {
    id: PageId,
    payload: Vec<u8>,
    dirtied_by: Option<TransactionId>,
    before_image: Vec<u8>,
}

impl Page {
    /// Constructs a freshly loaded (clean) page. The before-image is
    /// the payload as read from disk.
    pub fn new(id: PageId, payload: Vec<u8>) -> Self {
        let before_image = payload.clone();
        Self {
            id,
            payload,
            dirtied_by: None,
            before_image,
        }
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut Vec<u8> {
        &mut self.payload
    }

    pub fn set_payload(&mut self, payload: Vec<u8>) {
        self.payload = payload;
    }

    pub fn dirtied_by(&self) -> Option<TransactionId> {
        self.dirtied_by
    }

    pub fn is_dirty(&self) -> bool {
        self.dirtied_by.is_some()
    }

    pub fn mark_dirty(&mut self, tid: TransactionId) {
        self.dirtied_by = Some(tid);
    }

    pub fn clear_dirty(&mut self) {
        self.dirtied_by = None;
    }

    pub fn before_image(&self) -> &[u8] {
        &self.before_image
    }

    /// Called after a successful flush-to-disk at commit: the
    /// just-written payload becomes the new before-image.
    pub fn refresh_before_image(&mut self) {
        self.before_image = self.payload.clone();
    }

    /// Called on abort: restores the payload from the before-image
    /// captured when the page was first dirtied (or first read).
    pub fn restore_before_image(&mut self) {
        self.payload = self.before_image.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_page_before_image_matches_payload() {
        let p = Page::new(PageId::new(0, 0), vec![1, 2, 3]);
        assert_eq!(p.payload(), p.before_image());
        assert!(!p.is_dirty());
    }

    #[test]
    fn restore_before_image_undoes_in_place_edits() {
        let mut p = Page::new(PageId::new(0, 0), vec![1, 2, 3]);
        let tid = TransactionId::new();
        p.mark_dirty(tid);
        p.payload_mut()[0] = 99;
        assert!(p.is_dirty());

        p.restore_before_image();
        p.clear_dirty();
        assert_eq!(p.payload(), &[1, 2, 3]);
        assert!(!p.is_dirty());
    }

    #[test]
    fn refresh_before_image_adopts_new_payload() {
        let mut p = Page::new(PageId::new(0, 0), vec![1, 2, 3]);
        p.payload_mut()[0] = 42;
        p.refresh_before_image();
        assert_eq!(p.before_image(), &[42, 2, 3]);
    }
}
