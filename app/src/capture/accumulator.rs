use camera_capture::Fragment;
use log::debug;

/// Ordered fragments of the recording in progress
#[derive(Debug, Default)]
pub struct RecordingAccumulator {
    fragments: Vec<Fragment>,
}

impl RecordingAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append in arrival order. Empty fragments are dropped.
    pub fn push(&mut self, fragment: Fragment) -> bool {
        if fragment.is_empty() {
            debug!("Skipping empty fragment {}", fragment.index);
            return false;
        }
        self.fragments.push(fragment);
        true
    }

    pub fn clear(&mut self) {
        self.fragments.clear();
    }

    /// Hand the buffer over, leaving it empty
    pub fn take(&mut self) -> Vec<Fragment> {
        std::mem::take(&mut self.fragments)
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.fragments.iter().map(|f| f.bytes.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment(index: u64, bytes: &[u8]) -> Fragment {
        Fragment {
            index,
            bytes: bytes.to_vec(),
            captured_at_ms: index * 1000,
        }
    }

    #[test]
    fn test_keeps_order_and_skips_empty() {
        let mut acc = RecordingAccumulator::new();
        assert!(acc.push(fragment(0, b"ab")));
        assert!(!acc.push(fragment(1, b"")));
        assert!(acc.push(fragment(2, b"cde")));
        assert_eq!(acc.len(), 2);
        assert_eq!(acc.total_bytes(), 5);

        let taken = acc.take();
        assert_eq!(taken.iter().map(|f| f.index).collect::<Vec<_>>(), vec![0, 2]);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut acc = RecordingAccumulator::new();
        acc.push(fragment(0, b"x"));
        acc.clear();
        assert!(acc.is_empty());
    }
}
