//! Shared styling helpers for terminal output.

use console::Style;

use sidelock_core::status::Indicator;

/// Green check mark before `msg`.
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Red cross before `msg`.
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

pub fn header(msg: &str) -> String {
    Style::new().bold().apply_to(msg).to_string()
}

pub fn dim(msg: &str) -> String {
    Style::new().dim().apply_to(msg).to_string()
}

/// Owner names stand out in claim listings.
pub fn owner(name: &str) -> String {
    Style::new().cyan().apply_to(name).to_string()
}

pub fn indicator(indicator: Indicator) -> String {
    let style = match indicator {
        Indicator::Idle => Style::new().dim(),
        Indicator::Editing => Style::new().green().bold(),
        Indicator::LockedByOthers => Style::new().yellow().bold(),
    };
    format!("{} {}", style.apply_to("●"), indicator)
}

pub fn status_running(pid: u32) -> String {
    let style = Style::new().green();
    format!("{} Running (PID {})", style.apply_to("●"), pid)
}

pub fn status_stopped() -> String {
    let style = Style::new().dim();
    format!("{} Not running", style.apply_to("○"))
}
