use crate::images::ImageRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("portrait history is empty")]
pub struct EmptyHistory;

/// Prior portrait images, oldest first. Push and pop happen at the tail.
#[derive(Debug, Clone, Default)]
pub struct HistoryStack {
    entries: Vec<ImageRef>,
}

impl HistoryStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, image: ImageRef) {
        self.entries.push(image);
    }

    pub fn pop(&mut self) -> Result<ImageRef, EmptyHistory> {
        self.entries.pop().ok_or(EmptyHistory)
    }

    pub fn peek(&self) -> Option<&ImageRef> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageRef> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::{EmptyHistory, HistoryStack};
    use crate::images::ImageRef;

    fn image(tag: u8) -> ImageRef {
        ImageRef::new("image/png", vec![tag])
    }

    #[test]
    fn pop_is_last_in_first_out() {
        let mut history = HistoryStack::new();
        history.push(image(1));
        history.push(image(2));
        assert_eq!(history.len(), 2);
        assert_eq!(history.pop(), Ok(image(2)));
        assert_eq!(history.pop(), Ok(image(1)));
        assert!(history.is_empty());
    }

    #[test]
    fn pop_on_empty_reports_empty_history() {
        let mut history = HistoryStack::new();
        assert_eq!(history.pop(), Err(EmptyHistory));
    }

    #[test]
    fn iter_is_oldest_first() {
        let mut history = HistoryStack::new();
        history.push(image(1));
        history.push(image(2));
        let tags = history.iter().map(|entry| entry.bytes()[0]).collect::<Vec<u8>>();
        assert_eq!(tags, vec![1, 2]);
        assert_eq!(history.peek(), Some(&image(2)));
        history.clear();
        assert!(history.peek().is_none());
    }
}
