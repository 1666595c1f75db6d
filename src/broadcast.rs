use crate::error::RelayError;
use crate::pool::ConnPool;

/// Copies one received chunk onto the outbound queue of every connection
/// other than the sender and marks each receiver write-interested. Each
/// receiver gets its own independent copy; the sender is never a recipient.
pub fn broadcast<S>(
    pool: &mut ConnPool<S>,
    sender: usize,
    payload: &[u8],
) -> Result<(), RelayError> {
    if payload.is_empty() {
        return Err(RelayError::EmptyPayload);
    }

    for token in pool.tokens() {
        if token == sender {
            continue;
        }
        pool.enqueue(token, payload.to_vec());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::test_support::TestSink;

    #[test]
    fn sender_is_excluded() {
        let mut pool = ConnPool::new();
        for token in [1, 2, 3] {
            pool.add(token, ());
        }

        broadcast(&mut pool, 1, b"hi").unwrap();

        assert_eq!(pool.get_mut(1).unwrap().pending(), 0);
        assert_eq!(pool.get_mut(2).unwrap().pending(), 1);
        assert_eq!(pool.get_mut(3).unwrap().pending(), 1);
        assert!(!pool.wants_write(1));
        assert!(pool.wants_write(2));
        assert!(pool.wants_write(3));
    }

    #[test]
    fn empty_payload_is_rejected() {
        let mut pool = ConnPool::new();
        pool.add(1, ());
        pool.add(2, ());

        assert_eq!(broadcast(&mut pool, 1, b""), Err(RelayError::EmptyPayload));
        assert_eq!(pool.get_mut(2).unwrap().pending(), 0);
    }

    #[test]
    fn receiver_sees_chunks_in_send_order() {
        let mut pool = ConnPool::new();
        pool.add(1, TestSink::ok());
        pool.add(2, TestSink::ok());

        broadcast(&mut pool, 1, b"one").unwrap();
        broadcast(&mut pool, 1, b"two").unwrap();
        pool.flush(2).unwrap();

        assert_eq!(pool.get_mut(2).unwrap().stream.written, b"onetwo");
    }

    #[test]
    fn one_failing_receiver_does_not_affect_the_rest() {
        let mut pool = ConnPool::new();
        pool.add(1, TestSink::ok());
        pool.add(2, TestSink::failing());
        pool.add(3, TestSink::ok());

        broadcast(&mut pool, 1, b"payload").unwrap();
        pool.flush(2).unwrap();
        pool.flush(3).unwrap();

        let failing = pool.get_mut(2).unwrap();
        assert!(failing.stream.written.is_empty());
        assert_eq!(failing.pending(), 0);
        assert!(!pool.wants_write(2));

        assert_eq!(pool.get_mut(3).unwrap().stream.written, b"payload");
    }
}
