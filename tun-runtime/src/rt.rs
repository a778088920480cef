use std::sync::atomic::{AtomicBool, Ordering};

use tun_util::error::Result;

static EXIT: AtomicBool = AtomicBool::new(false);

/// Drives `step` in a loop until it returns `Ok(false)`, a Ctrl+C is received, or `step`
/// itself returns a fatal error.
///
/// Each call to `step` is expected to wait (via [`crate::wait`]) and process whatever it
/// finds ready, returning whether the caller should keep running. On Ctrl+C, `exit_fn` runs
/// once to let the caller request a graceful session close; the loop keeps calling `step`
/// afterwards so the close can be observed and the loop can exit cleanly.
pub fn exec(mut step: impl FnMut() -> Result<bool>, exit_fn: impl FnOnce()) -> Result {
	ctrlc::set_handler(|| EXIT.store(true, Ordering::Relaxed)).map_err(|err| log::error!("Error occurred while setting Ctrl+C handler: {err}"))?;

	let mut exit_fn = Some(exit_fn);

	loop {
		if EXIT.load(Ordering::Relaxed) {
			if let Some(f) = exit_fn.take() {
				f();
			}
		}

		if !step()? {
			return Ok(());
		}
	}
}
