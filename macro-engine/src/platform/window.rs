use super::WindowActivator;
use crate::WindowError;
use tracing::{debug, info};

/// Pick the window to target: an exact title match wins, otherwise the first
/// title containing `wanted` case-insensitively.
pub fn pick_window<'a>(titles: &'a [String], wanted: &str) -> Option<&'a str> {
    let wanted = wanted.trim();
    if wanted.is_empty() {
        return None;
    }
    if let Some(exact) = titles.iter().find(|t| t.as_str() == wanted) {
        return Some(exact);
    }
    let needle = wanted.to_lowercase();
    titles
        .iter()
        .find(|t| t.to_lowercase().contains(&needle))
        .map(String::as_str)
}

/// Focuses windows through the platform's own window API
#[derive(Debug, Default)]
pub struct NativeWindowActivator;

impl NativeWindowActivator {
    pub fn new() -> Self {
        Self
    }
}

impl WindowActivator for NativeWindowActivator {
    fn activate(&self, title: &str) -> Result<(), WindowError> {
        debug!(title, "Activating target window");
        imp::activate(title)?;
        info!(title, "Target window activated");
        Ok(())
    }

    fn list_titles(&self) -> Result<Vec<String>, WindowError> {
        imp::list_titles()
    }
}

#[cfg(target_os = "windows")]
mod imp {
    use super::pick_window;
    use crate::WindowError;
    use windows::core::BOOL;
    use windows::Win32::Foundation::{HWND, LPARAM};
    use windows::Win32::UI::WindowsAndMessaging::{
        EnumWindows, GetWindowTextLengthW, GetWindowTextW, IsIconic, IsWindowVisible,
        SetForegroundWindow, ShowWindow, SW_RESTORE,
    };

    fn visible_windows() -> Result<Vec<(HWND, String)>, WindowError> {
        let mut found: Vec<(HWND, String)> = Vec::new();
        unsafe {
            EnumWindows(
                Some(collect_window),
                LPARAM(&mut found as *mut Vec<(HWND, String)> as isize),
            )
        }
        .map_err(|e| WindowError::Platform(format!("EnumWindows failed: {}", e)))?;
        Ok(found)
    }

    unsafe extern "system" fn collect_window(hwnd: HWND, lparam: LPARAM) -> BOOL {
        let found = &mut *(lparam.0 as *mut Vec<(HWND, String)>);
        if IsWindowVisible(hwnd).as_bool() {
            let len = GetWindowTextLengthW(hwnd);
            if len > 0 {
                let mut buffer = vec![0u16; len as usize + 1];
                let copied = GetWindowTextW(hwnd, &mut buffer);
                if copied > 0 {
                    found.push((hwnd, String::from_utf16_lossy(&buffer[..copied as usize])));
                }
            }
        }
        BOOL(1)
    }

    pub(super) fn list_titles() -> Result<Vec<String>, WindowError> {
        Ok(visible_windows()?.into_iter().map(|(_, title)| title).collect())
    }

    pub(super) fn activate(title: &str) -> Result<(), WindowError> {
        let windows = visible_windows()?;
        let titles: Vec<String> = windows.iter().map(|(_, t)| t.clone()).collect();
        let chosen = pick_window(&titles, title)
            .ok_or_else(|| WindowError::NotFound(title.to_string()))?;
        let Some((hwnd, _)) = windows.iter().find(|(_, t)| t == chosen) else {
            return Err(WindowError::NotFound(title.to_string()));
        };

        unsafe {
            if IsIconic(*hwnd).as_bool() {
                let _ = ShowWindow(*hwnd, SW_RESTORE);
            }
            if !SetForegroundWindow(*hwnd).as_bool() {
                return Err(WindowError::Platform(format!(
                    "SetForegroundWindow refused '{}'",
                    chosen
                )));
            }
        }
        Ok(())
    }
}

#[cfg(target_os = "macos")]
mod imp {
    use crate::WindowError;
    use std::process::Command;

    const LIST_SCRIPT: &str = r#"set out to ""
tell application "System Events"
    repeat with p in (every process whose visible is true)
        repeat with w in windows of p
            set out to out & (name of w) & linefeed
        end repeat
    end repeat
end tell
return out"#;

    fn run_osascript(script: &str) -> Result<String, WindowError> {
        let output = Command::new("osascript").args(["-e", script]).output()?;
        if !output.status.success() {
            return Err(WindowError::Platform(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn escape(title: &str) -> String {
        title.replace('\\', "\\\\").replace('"', "\\\"")
    }

    pub(super) fn list_titles() -> Result<Vec<String>, WindowError> {
        Ok(run_osascript(LIST_SCRIPT)?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    pub(super) fn activate(title: &str) -> Result<(), WindowError> {
        let script = format!(
            r#"tell application "System Events"
    repeat with p in (every process whose visible is true)
        repeat with w in windows of p
            if name of w contains "{title}" then
                set frontmost of p to true
                perform action "AXRaise" of w
                return "found"
            end if
        end repeat
    end repeat
end tell
return "missing""#,
            title = escape(title)
        );
        match run_osascript(&script)?.trim() {
            "found" => Ok(()),
            _ => Err(WindowError::NotFound(title.to_string())),
        }
    }
}

#[cfg(target_os = "linux")]
mod imp {
    use super::pick_window;
    use crate::WindowError;
    use std::process::Command;

    pub(super) fn list_titles() -> Result<Vec<String>, WindowError> {
        let output = Command::new("wmctrl").arg("-l").output()?;
        if !output.status.success() {
            return Err(WindowError::Platform(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        // <window id> <desktop> <host> <title...>
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|line| line.split_whitespace().skip(3).collect::<Vec<_>>().join(" "))
            .filter(|title| !title.is_empty())
            .collect())
    }

    pub(super) fn activate(title: &str) -> Result<(), WindowError> {
        let titles = list_titles()?;
        let chosen = pick_window(&titles, title)
            .ok_or_else(|| WindowError::NotFound(title.to_string()))?;
        let status = Command::new("wmctrl").args(["-F", "-a", chosen]).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(WindowError::Platform(format!("wmctrl could not activate '{}'", chosen)))
        }
    }
}

#[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
mod imp {
    use crate::WindowError;

    pub(super) fn list_titles() -> Result<Vec<String>, WindowError> {
        Err(WindowError::Unsupported)
    }

    pub(super) fn activate(_title: &str) -> Result<(), WindowError> {
        Err(WindowError::Unsupported)
    }
}
