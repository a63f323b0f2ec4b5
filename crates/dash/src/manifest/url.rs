use url::Url;

use crate::{ByteRange, DashError, DashResult};

pub(crate) fn is_absolute_url(s: &str) -> bool {
    s.starts_with("http://")
        || s.starts_with("https://")
        || s.starts_with("file://")
        || s.starts_with("ftp://")
}

pub fn merge_baseurls(current: &Url, new: &str) -> DashResult<Url> {
    if is_absolute_url(new) {
        Ok(Url::parse(new)?)
    } else {
        // The query of the current URL (manifest URL, redirect target or an outer BaseURL)
        // is carried over unless the new URL brings its own.
        //
        // merge_baseurls(https://example.com/manifest.mpd?auth=secret, /video42.mp4) =>
        //   https://example.com/video42.mp4?auth=secret
        //
        // merge_baseurls(https://example.com/manifest.mpd?auth=old, /video42.mp4?auth=new) =>
        //   https://example.com/video42.mp4?auth=new
        let mut merged = current.join(new)?;
        if merged.query().is_none() {
            merged.set_query(current.query());
        }
        Ok(merged)
    }
}

/// Resolves a chain of BaseURL values, outermost first.
pub(crate) fn resolve_chain<'a, I>(base: &Url, chain: I) -> DashResult<Url>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut current = base.clone();
    for new in chain {
        current = merge_baseurls(&current, new)?;
    }
    Ok(current)
}

/// The byte range shall be expressed and formatted as a byte-range-spec as defined in
/// IETF RFC 7233:2014, subclause 2.1. It is restricted to a single expression identifying
/// a contiguous range of bytes.
pub fn parse_media_range<S>(s: S) -> DashResult<ByteRange>
where
    S: AsRef<str>,
{
    let s = s.as_ref().trim();
    let invalid = || DashError::InvalidMediaRange(s.to_string());

    let (start, end) = s.split_once('-').ok_or_else(invalid)?;
    let first_byte_pos = start.trim().parse::<u64>().map_err(|_| invalid())?;
    let last_byte_pos = match end.trim() {
        "" => None,
        end => Some(end.parse::<u64>().map_err(|_| invalid())?),
    };

    match last_byte_pos {
        Some(last_byte_pos) if last_byte_pos < first_byte_pos => Err(invalid()),
        // 0-500 means 501 bytes
        last_byte_pos => Ok(ByteRange {
            offset: first_byte_pos,
            length: last_byte_pos.map(|last_byte_pos| last_byte_pos - first_byte_pos + 1),
        }),
    }
}
