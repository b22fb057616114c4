//! Detaching from an interactive console
//!
//! Used when the agent goes to the background. Only Windows has a console
//! window to release; elsewhere this is a no-op that succeeds.

use crate::error::Result;

/// Detach the process from its console window
#[cfg(windows)]
pub fn close_console_window() -> Result<()> {
    #[link(name = "kernel32")]
    unsafe extern "system" {
        fn FreeConsole() -> i32;
    }

    // SAFETY: FreeConsole has no preconditions.
    if unsafe { FreeConsole() } == 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

/// Detach the process from its console window
#[cfg(not(windows))]
pub fn close_console_window() -> Result<()> {
    Ok(())
}
