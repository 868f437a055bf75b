//! Parser for the textual frame command `[{r,g,b}{r,g,b}…]`.
//!
//! Components are decimal 0–255. ASCII whitespace may appear between any two tokens, so a
//! trailing newline from `echo` is accepted. `[]` is an empty frame.
//!
//! ```
//! use led_strip_dma::command::parse;
//!
//! let frame = parse("[{255,0,16} {1,2,3}]\n").unwrap();
//! assert_eq!(frame.as_slice(), [255, 0, 16, 1, 2, 3]);
//! ```

use heapless::Vec;

use crate::config::MAX_BRIGHTNESS_BYTES;
use crate::{Error, Result};

/// Brightness bytes parsed from one command, `r, g, b` per LED.
pub type Frame = Vec<u8, MAX_BRIGHTNESS_BYTES>;

/// Parse a frame command into brightness bytes.
///
/// # Errors
///
/// [`Error::InvalidArgument`] for missing brackets or braces, a non-digit, a component above 255,
/// a triplet without exactly three components, trailing input, or more LEDs than one channel
/// drives.
pub fn parse(text: &str) -> Result<Frame> {
    let mut cursor = Cursor::new(text.as_bytes());
    let mut frame = Frame::new();

    cursor.expect(b'[', "command must start with '['")?;
    loop {
        match cursor.peek() {
            Some(b']') => {
                cursor.bump();
                break;
            }
            Some(b'{') => {
                cursor.bump();
                let red = cursor.component()?;
                cursor.expect(b',', "expected ',' between components")?;
                let green = cursor.component()?;
                cursor.expect(b',', "expected ',' between components")?;
                let blue = cursor.component()?;
                cursor.expect(b'}', "expected '}' after three components")?;
                frame
                    .extend_from_slice(&[red, green, blue])
                    .map_err(|()| Error::invalid("more LEDs than one channel drives"))?;
            }
            Some(_) => return Err(Error::invalid("expected '{' or ']'")),
            None => return Err(Error::invalid("command must end with ']'")),
        }
    }

    if cursor.peek().is_some() {
        return Err(Error::invalid("unexpected input after ']'"));
    }
    Ok(frame)
}

struct Cursor<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> Cursor<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    /// Next non-whitespace byte, without consuming it.
    fn peek(&mut self) -> Option<u8> {
        while let Some(&byte) = self.bytes.get(self.position) {
            if !byte.is_ascii_whitespace() {
                return Some(byte);
            }
            self.position += 1;
        }
        None
    }

    const fn bump(&mut self) {
        self.position += 1;
    }

    fn expect(&mut self, wanted: u8, reason: &'static str) -> Result<()> {
        if self.peek() == Some(wanted) {
            self.bump();
            Ok(())
        } else {
            Err(Error::invalid(reason))
        }
    }

    fn component(&mut self) -> Result<u8> {
        if !self.peek().is_some_and(|byte| byte.is_ascii_digit()) {
            return Err(Error::invalid("expected a decimal component"));
        }
        let mut value: u16 = 0;
        while let Some(digit) = self.peek_raw().filter(u8::is_ascii_digit) {
            value = value * 10 + u16::from(digit - b'0');
            if value > u16::from(u8::MAX) {
                return Err(Error::invalid("component above 255"));
            }
            self.bump();
        }
        u8::try_from(value).map_err(|_| Error::invalid("component above 255"))
    }

    fn peek_raw(&self) -> Option<u8> {
        self.bytes.get(self.position).copied()
    }
}
