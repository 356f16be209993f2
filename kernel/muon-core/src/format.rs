//! printf-style console formatter.
//!
//! The monitor-facing console surface formats C-style specifications at
//! runtime, which `core::fmt` cannot do, so the directive interpreter is
//! implemented here. Recognised conversions are `%d`, `%i`, `%u`, `%o`,
//! `%x`, `%X`, `%p`, `%c`, `%s` and `%%`, with the flags `#`, `0`, `-`,
//! `+` and space, optional width and precision, and the length modifiers
//! `h`, `hh`, `l`, `ll`, `L`, `j`, `z`, `t` (accepted and ignored —
//! arguments already carry their width).
//!
//! Numbers are rendered into a small stack buffer; the output string grows
//! on the heap as needed.

use alloc::string::String;
use core::iter::Peekable;
use core::str::Chars;

/// A formatter argument.
#[derive(Debug, Clone, Copy)]
pub enum Arg<'a> {
    /// A signed integer (`%d`, `%i`).
    Int(i64),
    /// An unsigned integer (`%u`, `%o`, `%x`, `%X`).
    Uint(u64),
    /// A pointer value (`%p`).
    Ptr(usize),
    /// A single character (`%c`).
    Char(char),
    /// A string (`%s`).
    Str(&'a str),
}

impl Arg<'_> {
    fn as_i64(self) -> i64 {
        match self {
            Self::Int(v) => v,
            Self::Uint(v) => v as i64,
            Self::Ptr(v) => v as i64,
            Self::Char(c) => c as i64,
            Self::Str(_) => 0,
        }
    }

    fn as_u64(self) -> u64 {
        match self {
            Self::Int(v) => v as u64,
            Self::Uint(v) => v,
            Self::Ptr(v) => v as u64,
            Self::Char(c) => c as u64,
            Self::Str(_) => 0,
        }
    }
}

/// Parsed conversion flags, width and precision.
#[derive(Default)]
struct Conv {
    alt: bool,
    zero: bool,
    left: bool,
    plus: bool,
    space: bool,
    width: usize,
    precision: Option<usize>,
}

/// Formats `spec` with `args`, returning the result.
///
/// Directives beyond the supplied arguments render as empty; unrecognised
/// conversion characters are emitted literally after their `%`.
pub fn format(spec: &str, args: &[Arg<'_>]) -> String {
    let mut out = String::with_capacity(spec.len());
    let mut chars = spec.chars().peekable();
    let mut next_arg = 0usize;

    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }

        let conv = parse_conv(&mut chars);

        let Some(conv_char) = chars.next() else {
            out.push('%');
            break;
        };

        if conv_char == '%' {
            out.push('%');
            continue;
        }

        let arg = args.get(next_arg).copied();
        next_arg += 1;

        match conv_char {
            'd' | 'i' => {
                if let Some(arg) = arg {
                    let v = arg.as_i64();
                    let sign = if v < 0 {
                        Some('-')
                    } else if conv.plus {
                        Some('+')
                    } else if conv.space {
                        Some(' ')
                    } else {
                        None
                    };
                    push_number(&mut out, v.unsigned_abs(), 10, false, sign, &conv);
                }
            }
            'u' => {
                if let Some(arg) = arg {
                    push_number(&mut out, arg.as_u64(), 10, false, None, &conv);
                }
            }
            'o' => {
                if let Some(arg) = arg {
                    push_number(&mut out, arg.as_u64(), 8, false, None, &conv);
                }
            }
            'x' => {
                if let Some(arg) = arg {
                    push_number(&mut out, arg.as_u64(), 16, false, None, &conv);
                }
            }
            'X' => {
                if let Some(arg) = arg {
                    push_number(&mut out, arg.as_u64(), 16, true, None, &conv);
                }
            }
            'p' => {
                if let Some(arg) = arg {
                    let mut pconv = conv;
                    pconv.alt = true;
                    push_number(&mut out, arg.as_u64(), 16, false, None, &pconv);
                }
            }
            'c' => {
                if let Some(arg) = arg {
                    let c = match arg {
                        Arg::Char(c) => c,
                        other => char::from_u32(other.as_u64() as u32).unwrap_or('?'),
                    };
                    let mut buf = [0u8; 4];
                    push_padded(&mut out, c.encode_utf8(&mut buf), &conv);
                }
            }
            's' => {
                if let Some(Arg::Str(s)) = arg {
                    let truncated = match conv.precision {
                        Some(p) => {
                            let end = s.char_indices().nth(p).map_or(s.len(), |(i, _)| i);
                            &s[..end]
                        }
                        None => s,
                    };
                    push_padded(&mut out, truncated, &conv);
                }
            }
            other => {
                // Unrecognised conversion: emit it literally.
                out.push('%');
                out.push(other);
                next_arg -= 1;
            }
        }
    }

    out
}

/// Parses flags, width, precision and length modifiers.
fn parse_conv(chars: &mut Peekable<Chars<'_>>) -> Conv {
    let mut conv = Conv::default();

    // Flags, in any order.
    while let Some(&c) = chars.peek() {
        match c {
            '#' => conv.alt = true,
            '0' => conv.zero = true,
            '-' => conv.left = true,
            '+' => conv.plus = true,
            ' ' => conv.space = true,
            _ => break,
        }
        chars.next();
    }

    conv.width = parse_digits(chars).unwrap_or(0);

    if chars.peek() == Some(&'.') {
        chars.next();
        conv.precision = Some(parse_digits(chars).unwrap_or(0));
    }

    // Length modifiers carry no information here; arguments are pre-sized.
    while let Some(&c) = chars.peek() {
        match c {
            'h' | 'l' | 'L' | 'j' | 'z' | 't' => {
                chars.next();
            }
            _ => break,
        }
    }

    conv
}

fn parse_digits(chars: &mut Peekable<Chars<'_>>) -> Option<usize> {
    let mut value: Option<usize> = None;
    while let Some(&c) = chars.peek() {
        let Some(digit) = c.to_digit(10) else { break };
        value = Some(value.unwrap_or(0) * 10 + digit as usize);
        chars.next();
    }
    value
}

/// Renders an unsigned value with sign, base prefix, precision and padding.
fn push_number(
    out: &mut String,
    value: u64,
    base: u64,
    upper: bool,
    sign: Option<char>,
    conv: &Conv,
) {
    // Digits accumulate least-significant first in a stack buffer; 22 octal
    // digits cover a full 64-bit value.
    let mut buf = [0u8; 24];
    let mut ndigits = 0;

    let digit_chars: &[u8; 16] = if upper {
        b"0123456789ABCDEF"
    } else {
        b"0123456789abcdef"
    };

    // Precision 0 with value 0 renders no digits.
    if value != 0 || conv.precision != Some(0) {
        let mut rest = value;
        loop {
            buf[ndigits] = digit_chars[(rest % base) as usize];
            ndigits += 1;
            rest /= base;
            if rest == 0 {
                break;
            }
        }
    }

    let min_digits = conv.precision.unwrap_or(0);

    let prefix: &str = if conv.alt && value != 0 {
        match (base, upper) {
            (8, _) => {
                // "0" prefix, unless precision padding already supplies one.
                if ndigits >= min_digits { "0" } else { "" }
            }
            (16, false) => "0x",
            (16, true) => "0X",
            _ => "",
        }
    } else {
        ""
    };

    let digits_len = ndigits.max(min_digits);
    let core_len = digits_len + prefix.len() + sign.map_or(0, |_| 1);
    let total = core_len.max(conv.width);

    // Space padding on the right is handled after the body; on the left it
    // must precede the sign, whereas zero padding follows it.
    let pad = total - core_len;
    let zero_pad = conv.zero && !conv.left && conv.precision.is_none();

    if pad > 0 && !conv.left && !zero_pad {
        push_repeat(out, ' ', pad);
    }

    if let Some(s) = sign {
        out.push(s);
    }
    out.push_str(prefix);

    if pad > 0 && zero_pad {
        push_repeat(out, '0', pad);
    }
    if min_digits > ndigits {
        push_repeat(out, '0', min_digits - ndigits);
    }

    for i in (0..ndigits).rev() {
        out.push(buf[i] as char);
    }

    if pad > 0 && conv.left && !zero_pad {
        push_repeat(out, ' ', pad);
    }
}

/// Pads `body` to the conversion width.
fn push_padded(out: &mut String, body: &str, conv: &Conv) {
    let len = body.chars().count();
    let pad = conv.width.saturating_sub(len);

    if !conv.left {
        push_repeat(out, ' ', pad);
    }
    out.push_str(body);
    if conv.left {
        push_repeat(out, ' ', pad);
    }
}

fn push_repeat(out: &mut String, c: char, n: usize) {
    for _ in 0..n {
        out.push(c);
    }
}
