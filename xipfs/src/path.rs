//! Structural path classification: given nothing but the flat record
//! list, decide whether a path already exists (as a file or directory),
//! could be created, or is invalid, without a dedicated directory record
//! type anywhere on flash.

use crate::errno::Errno;
use crate::record::{FileRecordHeader, PATH_MAX};
use crate::store::RecordAddr;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Tag {
    Undefined,
    Creatable,
    ExistsAsFile,
    ExistsAsEmptyDir,
    ExistsAsNonemptyDir,
    InvalidNotDirs,
    InvalidNotFound,
}

pub struct Classification {
    pub input: heapless::String<PATH_MAX>,
    pub dirname: heapless::String<PATH_MAX>,
    pub basename: heapless::String<PATH_MAX>,
    /// Count of records whose path shares `dirname` as a prefix — used by
    /// unlink/mkdir/rmdir to decide whether a directory just became empty.
    pub parent: usize,
    /// First record the classifier used as structural evidence for `tag`.
    pub witness: Option<RecordAddr>,
    pub tag: Tag,
}

/// Validate and canonicalize a caller-supplied path: must start with `/`,
/// charset `[0-9A-Za-z/._-]`, no `.`/`..`/empty components, fits in
/// `PATH_MAX` including the null terminator. A single trailing `/` is
/// accepted and stripped (except for the root path itself).
pub fn normalize(raw: &str) -> Result<heapless::String<PATH_MAX>, Errno> {
    if raw.is_empty() || !raw.starts_with('/') {
        return Err(Errno::EInvalArg);
    }
    if raw.len() >= PATH_MAX {
        return Err(Errno::ENameTooLong);
    }
    for b in raw.bytes() {
        let ok = b.is_ascii_alphanumeric() || matches!(b, b'/' | b'.' | b'_' | b'-');
        if !ok {
            return Err(Errno::EInvalArg);
        }
    }
    let trimmed = if raw.len() > 1 && raw.ends_with('/') {
        &raw[..raw.len() - 1]
    } else {
        raw
    };
    for component in trimmed.split('/').skip(1) {
        if component.is_empty() || component == "." || component == ".." {
            return Err(Errno::EInvalArg);
        }
    }
    let mut out: heapless::String<PATH_MAX> = heapless::String::new();
    out.push_str(trimmed).map_err(|_| Errno::ENameTooLong)?;
    Ok(out)
}

/// Re-append a trailing `/` to an already-normalized path, for the callers
/// (mkdir, directory-vs-directory rename) that need to spell out a
/// directory explicitly.
pub fn with_trailing_slash(path: &str) -> Result<heapless::String<PATH_MAX>, Errno> {
    let mut s: heapless::String<PATH_MAX> = heapless::String::new();
    s.push_str(path).map_err(|_| Errno::ENameTooLong)?;
    if !s.ends_with('/') {
        s.push('/').map_err(|_| Errno::ENameTooLong)?;
    }
    Ok(s)
}

/// The directory containing `path` (prefix up to and including the last
/// `/`, or `/` for root).
pub fn parent_dir(path: &str) -> heapless::String<PATH_MAX> {
    split(path).0
}

fn split(path: &str) -> (heapless::String<PATH_MAX>, heapless::String<PATH_MAX>) {
    let mut dirname: heapless::String<PATH_MAX> = heapless::String::new();
    let mut basename: heapless::String<PATH_MAX> = heapless::String::new();
    if path == "/" {
        dirname.push('/').ok();
        basename.push('/').ok();
        return (dirname, basename);
    }
    let idx = path.rfind('/').expect("normalized path always has a /");
    dirname.push_str(&path[..=idx]).ok();
    basename.push_str(&path[idx + 1..]).ok();
    (dirname, basename)
}

/// Classify `input` (already normalized) against every record in
/// `records`, in the priority order ExistsAsFile > ExistsAsEmptyDir >
/// ExistsAsNonemptyDir > InvalidNotDirs > Creatable.
pub fn classify<I>(records: I, input: &str) -> Result<Classification, Errno>
where
    I: IntoIterator<Item = Result<(RecordAddr, FileRecordHeader), Errno>>,
{
    let (dirname, basename) = split(input);
    let input_trimmed = input.trim_end_matches('/');
    let mut input_slash: heapless::String<PATH_MAX> = heapless::String::new();
    input_slash.push_str(input_trimmed).ok();
    if input_slash.as_str() != "/" {
        input_slash.push('/').ok();
    }

    let mut best_rank: u8 = u8::MAX;
    let mut best_tag = Tag::Undefined;
    let mut witness: Option<RecordAddr> = None;
    let mut parent = 0usize;
    let mut saw_any_record = false;

    for item in records {
        let (addr, header) = item?;
        saw_any_record = true;
        let path = header.path_str().ok_or(Errno::ENulTer)?;

        if path.starts_with(dirname.as_str()) {
            parent += 1;
        }

        let mut rank_tag: Option<(u8, Tag)> = None;

        if !path.ends_with('/') && path == input_trimmed {
            rank_tag = Some((0, Tag::ExistsAsFile));
        } else {
            let path_trimmed = path.trim_end_matches('/');
            if path.ends_with('/') && path_trimmed == input_trimmed {
                rank_tag = Some((1, Tag::ExistsAsEmptyDir));
            } else if path.starts_with(input_slash.as_str()) && path.len() > input_slash.len() {
                rank_tag = Some((2, Tag::ExistsAsNonemptyDir));
            } else if !path.ends_with('/') {
                let mut prefix: heapless::String<PATH_MAX> = heapless::String::new();
                let _ = prefix.push_str(path);
                let _ = prefix.push('/');
                if input_trimmed.starts_with(prefix.as_str()) || input.starts_with(prefix.as_str()) {
                    rank_tag = Some((3, Tag::InvalidNotDirs));
                }
            }
            if rank_tag.is_none() && path.starts_with(dirname.as_str()) {
                rank_tag = Some((4, Tag::Creatable));
            }
        }

        if let Some((rank, tag)) = rank_tag {
            if rank < best_rank {
                best_rank = rank;
                best_tag = tag;
                witness = Some(addr);
            }
        }
    }

    let tag = if best_tag != Tag::Undefined {
        best_tag
    } else if !saw_any_record {
        if dirname.as_str() == "/" {
            Tag::Creatable
        } else {
            Tag::InvalidNotFound
        }
    } else {
        Tag::InvalidNotFound
    };

    let mut input_owned: heapless::String<PATH_MAX> = heapless::String::new();
    input_owned.push_str(input).ok();

    Ok(Classification {
        input: input_owned,
        dirname,
        basename,
        parent,
        witness,
        tag,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_dotdot_and_bad_charset() {
        assert_eq!(normalize("/a/../b"), Err(Errno::EInvalArg));
        assert_eq!(normalize("/a//b"), Err(Errno::EInvalArg));
        assert_eq!(normalize("rel/path"), Err(Errno::EInvalArg));
        assert_eq!(normalize("/has space"), Err(Errno::EInvalArg));
    }

    #[test]
    fn strips_single_trailing_slash() {
        assert_eq!(normalize("/d/").unwrap().as_str(), "/d");
        assert_eq!(normalize("/").unwrap().as_str(), "/");
    }

    #[test]
    fn classify_empty_store() {
        let c = classify(core::iter::empty(), "/a").unwrap();
        assert_eq!(c.tag, Tag::Creatable);
        let c = classify(core::iter::empty(), "/a/b").unwrap();
        assert_eq!(c.tag, Tag::InvalidNotFound);
    }
}
