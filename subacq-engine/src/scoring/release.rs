//! Release-name tag parsing
//!
//! Pulls the release group, source/quality tag and resolution out of a
//! scene-style release name such as `Show.S01E02.1080p.WEB-DL-GROUP.mkv`.
//! Parsing is best-effort: anything not recognised is left as `None`.

use serde::{Deserialize, Serialize};

/// Extensions stripped before the release group is read
const KNOWN_EXTENSIONS: &[&str] = &["mkv", "mp4", "avi", "m4v", "ts", "srt", "ass", "ssa", "vtt", "sub"];

/// Tokens that look like a group suffix but are part of a tag
const NON_GROUP_TOKENS: &[&str] = &["dl", "rip", "web", "hdtv", "bluray", "dvd", "x264", "x265", "h264", "h265", "hevc"];

/// Source/quality tag of a release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualitySource {
    Bluray,
    Web,
    Hdtv,
    Dvd,
}

impl QualitySource {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "bluray" | "blu" | "bdrip" | "brrip" | "bdremux" => Some(QualitySource::Bluray),
            "webdl" | "webrip" | "web" => Some(QualitySource::Web),
            "hdtv" | "pdtv" => Some(QualitySource::Hdtv),
            "dvdrip" | "dvd" | "dvdscr" => Some(QualitySource::Dvd),
            _ => None,
        }
    }
}

/// Tags extracted from a release name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseTags {
    /// Lower-cased release group
    pub group: Option<String>,
    pub source: Option<QualitySource>,
    /// Vertical resolution in lines (480, 576, 720, 1080, 2160)
    pub resolution: Option<u16>,
}

impl ReleaseTags {
    pub fn parse(name: &str) -> Self {
        let stem = strip_extension(name.trim());
        let lower = stem.to_ascii_lowercase();

        let mut tags = ReleaseTags::default();
        for token in lower
            .split(|c: char| matches!(c, '.' | '_' | '-' | ' ' | '[' | ']' | '(' | ')'))
            .filter(|t| !t.is_empty())
        {
            if tags.resolution.is_none() {
                tags.resolution = parse_resolution(token);
            }
            if tags.source.is_none() {
                tags.source = QualitySource::from_token(token);
            }
        }
        tags.group = parse_group(&lower);
        tags
    }

    pub fn is_empty(&self) -> bool {
        self.group.is_none() && self.source.is_none() && self.resolution.is_none()
    }
}

fn strip_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, ext)) if KNOWN_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) => stem,
        _ => name,
    }
}

fn parse_resolution(token: &str) -> Option<u16> {
    if token == "4k" || token == "uhd" {
        return Some(2160);
    }
    let digits = token.strip_suffix('p')?;
    match digits.parse::<u16>().ok()? {
        r @ (480 | 576 | 720 | 1080 | 2160) => Some(r),
        _ => None,
    }
}

fn parse_group(lower_stem: &str) -> Option<String> {
    let (_, tail) = lower_stem.rsplit_once('-')?;
    let group: String = tail
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();

    if group.is_empty()
        || group.chars().all(|c| c.is_ascii_digit())
        || NON_GROUP_TOKENS.contains(&group.as_str())
        || parse_resolution(&group).is_some()
        || QualitySource::from_token(&group).is_some()
    {
        return None;
    }
    Some(group)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_episode_name() {
        let tags = ReleaseTags::parse("Show.Name.S01E02.720p.WEB-DL.x264-GRP.mkv");
        assert_eq!(tags.group.as_deref(), Some("grp"));
        assert_eq!(tags.source, Some(QualitySource::Web));
        assert_eq!(tags.resolution, Some(720));
    }

    #[test]
    fn test_bluray_and_4k() {
        let tags = ReleaseTags::parse("Movie (2019) [4K] BluRay-Sparks");
        assert_eq!(tags.resolution, Some(2160));
        assert_eq!(tags.source, Some(QualitySource::Bluray));
        assert_eq!(tags.group.as_deref(), Some("sparks"));
    }

    #[test]
    fn test_tag_suffix_is_not_a_group() {
        let tags = ReleaseTags::parse("Show.S02E01.1080p.WEB-DL");
        assert_eq!(tags.group, None);
        assert_eq!(tags.source, Some(QualitySource::Web));

        let tags = ReleaseTags::parse("Movie-2019");
        assert_eq!(tags.group, None);
    }

    #[test]
    fn test_unrecognised_name() {
        let tags = ReleaseTags::parse("some subtitle file");
        assert!(tags.is_empty());
    }

    #[test]
    fn test_hdtv_subtitle_extension() {
        let tags = ReleaseTags::parse("show.s03e04.hdtv.480p-lol.srt");
        assert_eq!(tags.source, Some(QualitySource::Hdtv));
        assert_eq!(tags.resolution, Some(480));
        assert_eq!(tags.group.as_deref(), Some("lol"));
    }
}
