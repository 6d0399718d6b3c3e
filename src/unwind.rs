//! Unwinding recovery utilities taken from rayon.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::string::ToString;
use core::any::Any;
use core::panic::AssertUnwindSafe;
use std::eprintln;
use std::panic::catch_unwind;
use std::panic::resume_unwind;
use std::process::abort;
use std::thread::Result;

/// Executes `f` and captures any panic, translating that panic into a
/// `Err` result. The assumption is that any panic will be propagated
/// later with `resume_unwinding`, and hence `f` can be treated as
/// exception safe.
#[inline(always)]
pub fn halt_unwinding<F, R>(func: F) -> Result<R>
where
    F: FnOnce() -> R,
{
    catch_unwind(AssertUnwindSafe(func))
}

#[cold]
pub fn resume_unwinding(payload: Box<dyn Any + Send>) -> ! {
    resume_unwind(payload)
}

/// Extracts the message from a panic payload, if it has one.
pub fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked with a non-string payload".to_string()
    }
}

/// Aborts the program when dropped.
pub struct AbortOnDrop;

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        eprintln!("Spindle: detected unexpected panic while completing a task; aborting");
        abort();
    }
}

#[cfg(test)]
mod tests {
    use alloc::boxed::Box;

    use super::*;

    #[test]
    fn captures_panic_messages() {
        let payload = halt_unwinding::<_, ()>(|| panic!("literal")).unwrap_err();
        assert_eq!(payload_message(payload.as_ref()), "literal");

        let code = 12;
        let payload = halt_unwinding::<_, ()>(|| panic!("code {code}")).unwrap_err();
        assert_eq!(payload_message(payload.as_ref()), "code 12");

        let payload: Box<dyn Any + Send> = Box::new(5_u32);
        assert_eq!(
            payload_message(payload.as_ref()),
            "task panicked with a non-string payload"
        );
    }

    #[test]
    fn passes_through_results() {
        assert_eq!(halt_unwinding(|| 3).unwrap(), 3);
    }
}
