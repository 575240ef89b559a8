//! Real capability providers for the local desktop: screen and window capture
//! through `xcap`, input simulation through `enigo`.

use std::sync::Arc;

use enigo::{Button, Coordinate, Direction, Enigo, Keyboard, Mouse, Settings};
use tracing::{debug, instrument};

use crate::errors::AutomationError;
use crate::providers::{InputInjector, Key, ScreenCapture, WindowBackend, WindowInfo};
use crate::types::{Capture, Point, Region};

/// Input provider driving the machine's real keyboard and mouse.
///
/// A fresh `Enigo` handle is created per operation; the handle is cheap and
/// this sidesteps its thread-affinity constraints.
pub struct DesktopInput;

impl DesktopInput {
    pub fn new() -> Self {
        Self
    }

    fn enigo() -> Result<Enigo, AutomationError> {
        Enigo::new(&Settings::default())
            .map_err(|e| AutomationError::PlatformError(format!("failed to init input: {e}")))
    }

    fn to_enigo_key(key: Key) -> enigo::Key {
        match key {
            Key::Control => enigo::Key::Control,
            Key::Shift => enigo::Key::Shift,
            Key::Alt => enigo::Key::Alt,
            Key::Enter => enigo::Key::Return,
            Key::Tab => enigo::Key::Tab,
            Key::Delete => enigo::Key::Delete,
            Key::Escape => enigo::Key::Escape,
            Key::Char(c) => enigo::Key::Unicode(c),
        }
    }
}

impl Default for DesktopInput {
    fn default() -> Self {
        Self::new()
    }
}

impl InputInjector for DesktopInput {
    fn click(&self, x: i32, y: i32) -> Result<(), AutomationError> {
        let mut enigo = Self::enigo()?;
        enigo
            .move_mouse(x, y, Coordinate::Abs)
            .map_err(|e| AutomationError::PlatformError(format!("failed to move mouse: {e}")))?;
        enigo
            .button(Button::Left, Direction::Click)
            .map_err(|e| AutomationError::PlatformError(format!("failed to click: {e}")))?;
        debug!(x, y, "clicked");
        Ok(())
    }

    fn type_text(&self, text: &str) -> Result<(), AutomationError> {
        let mut enigo = Self::enigo()?;
        enigo
            .text(text)
            .map_err(|e| AutomationError::PlatformError(format!("failed to type text: {e}")))?;
        Ok(())
    }

    fn press(&self, key: Key) -> Result<(), AutomationError> {
        let mut enigo = Self::enigo()?;
        enigo
            .key(Self::to_enigo_key(key), Direction::Click)
            .map_err(|e| AutomationError::PlatformError(format!("failed to press key: {e}")))?;
        Ok(())
    }

    fn chord(&self, keys: &[Key]) -> Result<(), AutomationError> {
        let Some((last, modifiers)) = keys.split_last() else {
            return Ok(());
        };
        let mut enigo = Self::enigo()?;
        for key in modifiers {
            enigo
                .key(Self::to_enigo_key(*key), Direction::Press)
                .map_err(|e| {
                    AutomationError::PlatformError(format!("failed to press modifier: {e}"))
                })?;
        }
        let result = enigo
            .key(Self::to_enigo_key(*last), Direction::Click)
            .map_err(|e| AutomationError::PlatformError(format!("failed to press key: {e}")));
        // Always release held modifiers, even when the chord key failed
        for key in modifiers.iter().rev() {
            let _ = enigo.key(Self::to_enigo_key(*key), Direction::Release);
        }
        result
    }
}

/// Screen and window provider backed by `xcap`.
///
/// Window activation is done by clicking into the window's title strip, which
/// works uniformly across window managers; the injector reference keeps that
/// click behind the same input path everything else uses.
pub struct DesktopBackend {
    input: Arc<dyn InputInjector>,
}

impl DesktopBackend {
    pub fn new(input: Arc<dyn InputInjector>) -> Self {
        Self { input }
    }

    fn window_info(window: &xcap::Window) -> Result<WindowInfo, AutomationError> {
        let err = |e: xcap::XCapError| AutomationError::PlatformError(format!("window query: {e}"));
        Ok(WindowInfo {
            id: window.id().map_err(err)?,
            title: window.title().map_err(err)?,
            app_name: window.app_name().map_err(err)?,
            region: Region::new(
                window.x().map_err(err)?,
                window.y().map_err(err)?,
                window.width().map_err(err)?,
                window.height().map_err(err)?,
            ),
            focused: window.is_focused().unwrap_or(false),
            minimized: window.is_minimized().unwrap_or(false),
        })
    }

    fn find_window(&self, id: u32) -> Result<xcap::Window, AutomationError> {
        let windows = xcap::Window::all()
            .map_err(|e| AutomationError::PlatformError(format!("failed to get windows: {e}")))?;
        for window in windows {
            if window.id().unwrap_or(0) == id {
                return Ok(window);
            }
        }
        Err(AutomationError::WindowNotFound(format!(
            "window {id} is no longer live"
        )))
    }
}

impl ScreenCapture for DesktopBackend {
    #[instrument(skip(self))]
    fn capture_screen(&self) -> Result<Capture, AutomationError> {
        let monitors = xcap::Monitor::all()
            .map_err(|e| AutomationError::PlatformError(format!("failed to get monitors: {e}")))?;
        let mut primary = None;
        for monitor in monitors {
            if monitor.is_primary().unwrap_or(false) {
                primary = Some(monitor);
                break;
            }
        }
        let primary = primary.ok_or_else(|| {
            AutomationError::PlatformError("could not find primary monitor".to_string())
        })?;
        let origin = Point::new(primary.x().unwrap_or(0), primary.y().unwrap_or(0));
        let image = primary
            .capture_image()
            .map_err(|e| AutomationError::PlatformError(format!("failed to capture screen: {e}")))?;
        Ok(Capture::new(image, origin))
    }
}

impl WindowBackend for DesktopBackend {
    fn list_windows(&self) -> Result<Vec<WindowInfo>, AutomationError> {
        let windows = xcap::Window::all()
            .map_err(|e| AutomationError::PlatformError(format!("failed to get windows: {e}")))?;
        let mut infos = Vec::with_capacity(windows.len());
        for window in &windows {
            match Self::window_info(window) {
                Ok(info) => infos.push(info),
                // Windows can disappear mid-enumeration
                Err(_) => continue,
            }
        }
        Ok(infos)
    }

    #[instrument(skip(self, window), fields(title = %window.title))]
    fn focus(&self, window: &WindowInfo) -> Result<(), AutomationError> {
        if window.focused && !window.minimized {
            return Ok(());
        }
        // Click into the window's title strip to raise it
        let target = Point::new(
            window.region.x + window.region.width as i32 / 2,
            window.region.y + 8,
        );
        self.input.click(target.x, target.y)
    }

    fn capture_window(&self, window: &WindowInfo) -> Result<Capture, AutomationError> {
        let live = self.find_window(window.id)?;
        let image = live
            .capture_image()
            .map_err(|e| AutomationError::PlatformError(format!("failed to capture window: {e}")))?;
        let origin = Point::new(live.x().unwrap_or(window.region.x), live.y().unwrap_or(window.region.y));
        Ok(Capture::new(image, origin))
    }
}
