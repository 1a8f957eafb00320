//! Path templates.
//!
//! Repository path formats are printf-style strings such as
//! `/zfs/repo10+2/pod%d/block%s/cap%d/scatter%d/`. They are filled in two
//! stages: the driver substitutes pod, capacitor and scatter, leaving a
//! block placeholder that the erasure engine fills for each block file.

use crate::error::{DalError, DalResult};

/// Character that replaces '/' in flattened object ids.
pub const FLAT_OBJID_SEPARATOR: char = '#';

/// Turns an object id into a single path component.
pub fn flatten_objid(objid: &str) -> String {
    objid.replace('/', &FLAT_OBJID_SEPARATOR.to_string())
}

/// Argument for [`format_template`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FmtArg<'a> {
    /// Rendered by `%d`, `%i`, `%u` (and `%s`, in decimal).
    Int(i64),
    /// Rendered by `%s` (and the integer conversions, verbatim).
    Str(&'a str),
}

/// Fills the conversions of `format` with `args`, in order.
///
/// Supports `%d`, `%i`, `%u`, `%s` with an optional `0` flag and width,
/// and `%%`. Surplus arguments are ignored; a conversion without an
/// argument is an error.
pub fn format_template(format: &str, args: &[FmtArg<'_>]) -> DalResult<String> {
    let mut out = String::with_capacity(format.len() + 16);
    let mut args = args.iter();
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        let mut zero_pad = false;
        let mut width = 0usize;
        if chars.peek() == Some(&'0') {
            zero_pad = true;
            chars.next();
        }
        while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
            width = width * 10 + d as usize;
            chars.next();
        }

        let conv = chars.next().ok_or_else(|| bad_format(format, "trailing '%'"))?;
        let rendered = match conv {
            '%' => {
                out.push('%');
                continue;
            }
            'd' | 'i' | 'u' | 's' => match args.next() {
                Some(FmtArg::Int(v)) => v.to_string(),
                Some(FmtArg::Str(s)) => (*s).to_string(),
                None => return Err(bad_format(format, "more conversions than arguments")),
            },
            other => {
                return Err(bad_format(
                    format,
                    &format!("unsupported conversion '%{}'", other),
                ))
            }
        };

        let pad = width.saturating_sub(rendered.chars().count());
        let fill = if zero_pad { '0' } else { ' ' };
        out.extend(std::iter::repeat(fill).take(pad));
        out.push_str(&rendered);
    }

    Ok(out)
}

fn bad_format(format: &str, reason: &str) -> DalError {
    DalError::InvalidOption {
        key: format.to_string(),
        reason: reason.to_string(),
    }
}
