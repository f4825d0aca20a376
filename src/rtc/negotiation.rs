/// Holds locally gathered ICE candidates while an offer is outstanding.
///
/// Candidates are released in discovery order once the remote answer has
/// been applied; after that they pass straight through.
#[derive(Debug)]
pub struct CandidateBuffer {
    making_offer: bool,
    pending: Vec<String>,
}

impl Default for CandidateBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl CandidateBuffer {
    /// A fresh connection has not been answered yet, so it starts buffering.
    pub fn new() -> Self {
        Self {
            making_offer: true,
            pending: Vec::new(),
        }
    }

    pub fn is_making_offer(&self) -> bool {
        self.making_offer
    }

    pub fn begin_offer(&mut self) {
        self.making_offer = true;
    }

    /// Returns the candidate back if it should be sent right away.
    pub fn push(&mut self, candidate: String) -> Option<String> {
        if self.making_offer {
            self.pending.push(candidate);
            None
        } else {
            Some(candidate)
        }
    }

    /// Marks the answer as applied and drains everything held so far.
    pub fn answer_applied(&mut self) -> Vec<String> {
        self.making_offer = false;
        std::mem::take(&mut self.pending)
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holds_candidates_until_the_answer() {
        let mut buffer = CandidateBuffer::new();
        assert_eq!(buffer.push("a".into()), None);
        assert_eq!(buffer.push("b".into()), None);
        assert_eq!(buffer.pending(), 2);

        assert_eq!(buffer.answer_applied(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(buffer.push("c".into()), Some("c".to_string()));
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn renegotiation_buffers_again() {
        let mut buffer = CandidateBuffer::new();
        buffer.answer_applied();
        buffer.begin_offer();
        assert!(buffer.is_making_offer());
        assert_eq!(buffer.push("d".into()), None);
        assert_eq!(buffer.answer_applied(), vec!["d".to_string()]);
    }
}
