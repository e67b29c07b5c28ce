//! Platform window capture.
//!
//! - **Windows**: finds top-level windows with `EnumWindows` and grabs their
//!   client area with `PrintWindow` into a top-down 32-bit DIB, which works
//!   for windows that are partially covered or on another virtual desktop.
//! - **Linux**: walks the X11 window tree, matches `_NET_WM_NAME` or
//!   `WM_NAME`, and reads the window contents with `GetImage`. Needs a
//!   reachable X server (`DISPLAY`); under Wayland only XWayland clients
//!   are visible.
//!
//! Elsewhere [`platform_backend`] returns `None` and window capture sources
//! fail to open.

use std::sync::Arc;

use super::window::WindowBackend;

/// The window backend for the current OS, if there is one.
pub fn platform_backend() -> Option<Arc<dyn WindowBackend>> {
    #[cfg(target_os = "windows")]
    {
        Some(Arc::new(platform::Win32WindowBackend))
    }
    #[cfg(target_os = "linux")]
    {
        match x11::X11WindowBackend::connect() {
            Ok(backend) => Some(Arc::new(backend)),
            Err(e) => {
                tracing::debug!("x11 window capture unavailable: {e}");
                None
            }
        }
    }
    #[cfg(not(any(target_os = "windows", target_os = "linux")))]
    {
        None
    }
}

/// Convert tightly packed BGRA rows into RGB.
pub fn bgra_to_rgb(bgra: &[u8], width: u32, height: u32) -> Option<image::RgbImage> {
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for px in bgra.chunks_exact(4) {
        rgb.extend_from_slice(&[px[2], px[1], px[0]]);
    }
    image::RgbImage::from_raw(width, height, rgb)
}

// ── Windows implementation ───────────────────────────────────────

#[cfg(target_os = "windows")]
pub mod platform {
    use std::ffi::c_void;

    use image::RgbImage;
    use windows::Win32::{
        Foundation::{BOOL, HWND, LPARAM, RECT},
        Graphics::Gdi::{
            BI_RGB, BITMAPINFO, BITMAPINFOHEADER, CreateCompatibleBitmap, CreateCompatibleDC,
            DIB_RGB_COLORS, DeleteDC, DeleteObject, GetDC, GetDIBits, ReleaseDC, SelectObject,
        },
        Storage::Xps::{PRINT_WINDOW_FLAGS, PrintWindow},
        UI::WindowsAndMessaging::{
            EnumWindows, GetClientRect, GetWindowTextLengthW, GetWindowTextW, IsWindow,
            IsWindowVisible,
        },
    };

    use super::bgra_to_rgb;
    use crate::source::window::{WindowBackend, WindowHandle, title_matches};

    /// `PW_RENDERFULLCONTENT`: capture DirectComposition content too.
    const PW_RENDERFULLCONTENT: PRINT_WINDOW_FLAGS = PRINT_WINDOW_FLAGS(2);

    /// `EnumWindows` + `PrintWindow` backend.
    ///
    /// # Safety
    ///
    /// All unsafe FFI calls are confined to this type.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct Win32WindowBackend;

    struct Search {
        pattern: String,
        found: Option<HWND>,
    }

    unsafe extern "system" fn enum_proc(hwnd: HWND, lparam: LPARAM) -> BOOL {
        let search = unsafe { &mut *(lparam.0 as *mut Search) };
        if !unsafe { IsWindowVisible(hwnd) }.as_bool() {
            return BOOL(1);
        }
        let len = unsafe { GetWindowTextLengthW(hwnd) };
        if len <= 0 {
            return BOOL(1);
        }
        let mut buf = vec![0u16; len as usize + 1];
        let n = unsafe { GetWindowTextW(hwnd, &mut buf) };
        let title = String::from_utf16_lossy(&buf[..n.max(0) as usize]);
        if title_matches(&title, &search.pattern) {
            search.found = Some(hwnd);
            return BOOL(0);
        }
        BOOL(1)
    }

    impl WindowBackend for Win32WindowBackend {
        fn find(&self, pattern: &str) -> Option<WindowHandle> {
            let mut search = Search {
                pattern: pattern.to_string(),
                found: None,
            };
            // Stopping the enumeration early reports an error; the result
            // is in `search` either way.
            let _ = unsafe {
                EnumWindows(
                    Some(enum_proc),
                    LPARAM(&mut search as *mut Search as isize),
                )
            };
            search.found.map(|h| WindowHandle(h.0 as isize))
        }

        fn capture(&self, handle: WindowHandle) -> Option<RgbImage> {
            unsafe { capture_client(HWND(handle.0 as *mut c_void)) }
        }
    }

    unsafe fn capture_client(hwnd: HWND) -> Option<RgbImage> {
        if !unsafe { IsWindow(hwnd) }.as_bool() {
            return None;
        }
        let mut rect = RECT::default();
        unsafe { GetClientRect(hwnd, &mut rect) }.ok()?;
        let (width, height) = (rect.right - rect.left, rect.bottom - rect.top);
        if width <= 0 || height <= 0 {
            return None;
        }

        let window_dc = unsafe { GetDC(hwnd) };
        let mem_dc = unsafe { CreateCompatibleDC(window_dc) };
        let bitmap = unsafe { CreateCompatibleBitmap(window_dc, width, height) };
        let previous = unsafe { SelectObject(mem_dc, bitmap) };

        let printed = unsafe { PrintWindow(hwnd, mem_dc, PW_RENDERFULLCONTENT) }.as_bool();

        let mut info = BITMAPINFO {
            bmiHeader: BITMAPINFOHEADER {
                biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
                biWidth: width,
                // Negative height: top-down rows.
                biHeight: -height,
                biPlanes: 1,
                biBitCount: 32,
                biCompression: BI_RGB.0,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut bgra = vec![0u8; width as usize * height as usize * 4];
        let lines = if printed {
            unsafe {
                GetDIBits(
                    mem_dc,
                    bitmap,
                    0,
                    height as u32,
                    Some(bgra.as_mut_ptr() as *mut c_void),
                    &mut info,
                    DIB_RGB_COLORS,
                )
            }
        } else {
            0
        };

        unsafe {
            SelectObject(mem_dc, previous);
            let _ = DeleteObject(bitmap);
            let _ = DeleteDC(mem_dc);
            ReleaseDC(hwnd, window_dc);
        }

        if lines != height {
            return None;
        }
        bgra_to_rgb(&bgra, width as u32, height as u32)
    }
}

// ── Linux (X11) implementation ───────────────────────────────────

#[cfg(target_os = "linux")]
pub mod x11 {
    use image::RgbImage;
    use x11rb::connection::Connection;
    use x11rb::errors::ConnectError;
    use x11rb::protocol::xproto::{
        Atom, AtomEnum, ConnectionExt as _, ImageFormat, MapState, Window,
    };
    use x11rb::rust_connection::RustConnection;

    use super::bgra_to_rgb;
    use crate::source::window::{WindowBackend, WindowHandle, title_matches};

    /// Windows visited per search, so a runaway tree cannot stall capture.
    const MAX_WINDOWS: usize = 4096;

    /// X11 `QueryTree` + `GetImage` backend.
    pub struct X11WindowBackend {
        conn: RustConnection,
        root: Window,
        net_wm_name: Atom,
        utf8_string: Atom,
    }

    impl X11WindowBackend {
        /// Connect to the server named by `DISPLAY`.
        pub fn connect() -> Result<Self, ConnectError> {
            let (conn, screen) = x11rb::connect(None)?;
            let root = conn.setup().roots[screen].root;
            let intern = |name: &[u8]| -> Atom {
                conn.intern_atom(false, name)
                    .ok()
                    .and_then(|cookie| cookie.reply().ok())
                    .map_or(x11rb::NONE, |reply| reply.atom)
            };
            let net_wm_name = intern(b"_NET_WM_NAME");
            let utf8_string = intern(b"UTF8_STRING");
            tracing::debug!("connected to X server, screen {screen}");
            Ok(Self {
                conn,
                root,
                net_wm_name,
                utf8_string,
            })
        }

        fn property(&self, window: Window, property: Atom, kind: Atom) -> Option<Vec<u8>> {
            if property == x11rb::NONE {
                return None;
            }
            let reply = self
                .conn
                .get_property(false, window, property, kind, 0, 1024)
                .ok()?
                .reply()
                .ok()?;
            (!reply.value.is_empty()).then_some(reply.value)
        }

        fn title(&self, window: Window) -> Option<String> {
            window_title(
                self.property(window, self.net_wm_name, self.utf8_string),
                self.property(window, AtomEnum::WM_NAME.into(), AtomEnum::ANY.into()),
            )
        }

        fn is_viewable(&self, window: Window) -> bool {
            self.conn
                .get_window_attributes(window)
                .ok()
                .and_then(|cookie| cookie.reply().ok())
                .is_some_and(|attrs| attrs.map_state == MapState::VIEWABLE)
        }

        fn children(&self, window: Window) -> Vec<Window> {
            self.conn
                .query_tree(window)
                .ok()
                .and_then(|cookie| cookie.reply().ok())
                .map_or_else(Vec::new, |tree| tree.children)
        }
    }

    impl WindowBackend for X11WindowBackend {
        fn find(&self, pattern: &str) -> Option<WindowHandle> {
            // Depth-first from the root; top-level frames come before the
            // client windows they wrap.
            let mut stack = vec![self.root];
            let mut visited = 0;
            while let Some(window) = stack.pop() {
                visited += 1;
                if visited > MAX_WINDOWS {
                    break;
                }
                if window != self.root
                    && self.is_viewable(window)
                    && self.title(window).is_some_and(|t| title_matches(&t, pattern))
                {
                    return Some(WindowHandle(window as isize));
                }
                stack.extend(self.children(window).into_iter().rev());
            }
            None
        }

        fn capture(&self, handle: WindowHandle) -> Option<RgbImage> {
            let window = Window::try_from(handle.0).ok()?;
            let geometry = self.conn.get_geometry(window).ok()?.reply().ok()?;
            let (width, height) = (geometry.width, geometry.height);
            if width == 0 || height == 0 {
                return None;
            }
            let image = self
                .conn
                .get_image(ImageFormat::Z_PIXMAP, window, 0, 0, width, height, !0)
                .ok()?
                .reply()
                .ok()?;
            zpixmap_to_rgb(&image.data, image.depth, width.into(), height.into())
        }
    }

    /// Prefer the UTF-8 EWMH title, fall back to the legacy one.
    pub fn window_title(net_wm_name: Option<Vec<u8>>, wm_name: Option<Vec<u8>>) -> Option<String> {
        net_wm_name
            .or(wm_name)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Convert a 24/32-bit `ZPixmap` (BGRX, little-endian server) to RGB.
    pub fn zpixmap_to_rgb(data: &[u8], depth: u8, width: u32, height: u32) -> Option<RgbImage> {
        if !matches!(depth, 24 | 32) || data.len() != width as usize * height as usize * 4 {
            return None;
        }
        bgra_to_rgb(data, width, height)
    }
}
