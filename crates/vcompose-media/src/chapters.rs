//! Chapter markers and FFMETADATA1 files.

use vcompose_models::{ChapterMarker, JobMetadata, SceneAsset};

/// Builds one chapter marker per scene from effective durations.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChapterMarkerBuilder;

impl ChapterMarkerBuilder {
    /// `start_time[i]` is the sum of the effective durations before scene `i`.
    ///
    /// Call only once effective durations are final, i.e. after narration sync.
    pub fn build<'a, I>(scenes: I) -> Vec<ChapterMarker>
    where
        I: IntoIterator<Item = (&'a SceneAsset, f64)>,
    {
        let mut start = 0.0;
        scenes
            .into_iter()
            .enumerate()
            .map(|(index, (scene, duration))| {
                let marker = ChapterMarker {
                    title: scene.display_title(index),
                    start_time: start,
                    end_time: start + duration,
                };
                start += duration;
                marker
            })
            .collect()
    }
}

/// Escape a value for an FFMETADATA1 file.
pub fn escape_metadata(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '=' | ';' | '#' | '\\' | '\n' => {
                escaped.push('\\');
                escaped.push(ch);
            }
            '\r' => {}
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Container-level tags for job metadata, skipping empty fields.
pub fn metadata_tags(metadata: &JobMetadata) -> Vec<(&'static str, String)> {
    let mut tags = Vec::new();
    if !metadata.title.is_empty() {
        tags.push(("title", metadata.title.clone()));
    }
    if !metadata.description.is_empty() {
        tags.push(("description", metadata.description.clone()));
        tags.push(("comment", metadata.description.clone()));
    }
    if !metadata.tags.is_empty() {
        tags.push(("keywords", metadata.tags.join(", ")));
    }
    tags
}

/// Render job metadata and chapters as an FFMETADATA1 document.
pub fn render_ffmetadata(metadata: &JobMetadata, chapters: &[ChapterMarker]) -> String {
    let mut out = String::from(";FFMETADATA1\n");

    for (key, value) in metadata_tags(metadata) {
        out.push_str(&format!("{}={}\n", key, escape_metadata(&value)));
    }

    for chapter in chapters {
        out.push_str("\n[CHAPTER]\nTIMEBASE=1/1000\n");
        out.push_str(&format!("START={}\n", chapter.start_ms()));
        out.push_str(&format!("END={}\n", chapter.end_ms()));
        out.push_str(&format!("title={}\n", escape_metadata(&chapter.title)));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_markers() {
        let scenes = vec![
            SceneAsset::new(1, 10.0).with_title("Intro"),
            SceneAsset::new(2, 10.0),
            SceneAsset::new(3, 10.0),
        ];
        let markers = ChapterMarkerBuilder::build(scenes.iter().map(|s| (s, s.declared_duration)));

        assert_eq!(markers.len(), 3);
        let starts: Vec<f64> = markers.iter().map(|m| m.start_time).collect();
        assert_eq!(starts, vec![0.0, 10.0, 20.0]);
        assert_eq!(markers[0].title, "Intro");
        assert_eq!(markers[1].title, "Scene 2");
        assert_eq!(markers[2].end_time, 30.0);
    }

    #[test]
    fn test_starts_strictly_increase_with_extension() {
        let scenes = vec![SceneAsset::new(1, 4.0), SceneAsset::new(2, 4.0), SceneAsset::new(3, 2.0)];
        let effective = [4.0, 5.75, 2.0];
        let markers = ChapterMarkerBuilder::build(scenes.iter().zip(effective));

        assert!(markers.windows(2).all(|w| w[0].start_time < w[1].start_time));
        assert_eq!(markers[2].start_time, 9.75);
    }

    #[test]
    fn test_escape_metadata() {
        assert_eq!(escape_metadata("a=b;c#d\\e"), "a\\=b\\;c\\#d\\\\e");
        assert_eq!(escape_metadata("line1\nline2"), "line1\\\nline2");
    }

    #[test]
    fn test_render_ffmetadata() {
        let metadata = JobMetadata {
            title: "Launch = day".to_string(),
            description: String::new(),
            tags: vec!["demo".to_string(), "launch".to_string()],
        };
        let chapters = vec![ChapterMarker {
            title: "Scene 1".to_string(),
            start_time: 0.0,
            end_time: 2.5,
        }];

        let doc = render_ffmetadata(&metadata, &chapters);
        assert!(doc.starts_with(";FFMETADATA1\n"));
        assert!(doc.contains("title=Launch \\= day\n"));
        assert!(doc.contains("keywords=demo, launch\n"));
        assert!(!doc.contains("description="));
        assert!(doc.contains("[CHAPTER]\nTIMEBASE=1/1000\nSTART=0\nEND=2500\ntitle=Scene 1\n"));
    }

    #[test]
    fn test_metadata_tags_mirror_description() {
        let metadata = JobMetadata {
            title: String::new(),
            description: "About".to_string(),
            tags: Vec::new(),
        };
        let tags = metadata_tags(&metadata);
        assert_eq!(
            tags,
            vec![("description", "About".to_string()), ("comment", "About".to_string())]
        );
    }
}
