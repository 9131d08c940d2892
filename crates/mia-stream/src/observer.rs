use crate::assembler::AssembledMessage;

/// Receives a snapshot of the message after every processed chunk and
/// after the session's terminal transition.
///
/// Called synchronously from the session loop: the notification for chunk
/// *k* has returned before chunk *k + 1* is decoded. Keep it cheap.
pub trait StreamObserver {
    fn on_update(&mut self, message: &AssembledMessage);
}

impl<F> StreamObserver for F
where
    F: FnMut(&AssembledMessage),
{
    fn on_update(&mut self, message: &AssembledMessage) {
        self(message)
    }
}
