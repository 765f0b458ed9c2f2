use std::io::BufRead;

use crate::BeatmapsetId;

pub const FORMAT_MARKER: &str = "osu file format";
const SET_ID_KEY: &str = "BeatmapSetID:";
const HIT_OBJECTS: &str = "[HitObjects]";
/// Set id written by the editor for maps that were never submitted.
pub const UNSUBMITTED_SET_ID: i64 = -1;

/// What a single file on disk turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapFileScan {
    NotAMap,
    Map(Option<BeatmapsetId>),
}

/// Reads just enough of `reader` to classify it and pull out the beatmapset id.
///
/// Stops at the first `BeatmapSetID:` line or at `[HitObjects]`, whichever
/// comes first. Read errors and non UTF-8 bytes never fail the scan.
pub fn scan_map_file<R: BufRead>(mut reader: R) -> MapFileScan {
    let mut buf = Vec::new();
    if reader.read_until(b'\n', &mut buf).is_err() {
        return MapFileScan::NotAMap;
    }
    let first = String::from_utf8_lossy(&buf);
    if !first.starts_with(FORMAT_MARKER) {
        return MapFileScan::NotAMap;
    }

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => return MapFileScan::Map(None),
            Ok(_) => {}
        }
        let line = String::from_utf8_lossy(&buf);
        if let Some(rest) = line.strip_prefix(SET_ID_KEY) {
            return MapFileScan::Map(parse_set_id(rest));
        }
        if line.starts_with(HIT_OBJECTS) {
            return MapFileScan::Map(None);
        }
    }
}

fn parse_set_id(raw: &str) -> Option<BeatmapsetId> {
    let value = raw.trim().parse::<i64>().ok()?;
    if value == UNSUBMITTED_SET_ID || value < 1 {
        return None;
    }
    BeatmapsetId::try_from(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor, Read};

    /// Reader whose every read fails, like a file on a dying disk.
    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::other("device gone"))
        }
    }

    impl BufRead for Broken {
        fn fill_buf(&mut self) -> io::Result<&[u8]> {
            Err(io::Error::other("device gone"))
        }

        fn consume(&mut self, _amt: usize) {}
    }

    fn scan(text: &str) -> MapFileScan {
        scan_map_file(Cursor::new(text.as_bytes()))
    }

    #[test]
    fn extracts_set_id_before_hit_objects() {
        let text = "osu file format v14\n\n[General]\nAudioFilename: audio.mp3\n\n[Metadata]\nTitle:Song\nBeatmapID:4711\nBeatmapSetID: 2201473\n\n[HitObjects]\n256,192,1000,1,0\n";
        assert_eq!(scan(text), MapFileScan::Map(Some(2201473)));
    }

    #[test]
    fn crlf_lines_are_trimmed() {
        let text = "osu file format v14\r\n[Metadata]\r\nBeatmapSetID:99\r\n";
        assert_eq!(scan(text), MapFileScan::Map(Some(99)));
    }

    #[test]
    fn unsubmitted_maps_have_no_id() {
        let text = "osu file format v14\n[Metadata]\nBeatmapSetID:-1\n[HitObjects]\n";
        assert_eq!(scan(text), MapFileScan::Map(None));
    }

    #[test]
    fn id_after_hit_objects_is_ignored() {
        let text = "osu file format v9\n[Metadata]\nTitle:Old\n[HitObjects]\nBeatmapSetID:5\n";
        assert_eq!(scan(text), MapFileScan::Map(None));
    }

    #[test]
    fn malformed_id_is_no_id() {
        let text = "osu file format v14\nBeatmapSetID: twelve\nBeatmapSetID: 12\n";
        assert_eq!(scan(text), MapFileScan::Map(None));
    }

    #[test]
    fn other_files_are_not_maps() {
        assert_eq!(scan("[Events]\nBeatmapSetID:5\n"), MapFileScan::NotAMap);
        assert_eq!(scan(""), MapFileScan::NotAMap);
        let binary = [0xffu8, 0xd8, 0xff, 0xe0, 0x00, b'\n', b'x'];
        assert_eq!(scan_map_file(Cursor::new(&binary[..])), MapFileScan::NotAMap);
    }

    #[test]
    fn read_error_after_header_gives_no_id() {
        let reader = Cursor::new(&b"osu file format v14\n[General]\n"[..]).chain(Broken);
        assert_eq!(scan_map_file(reader), MapFileScan::Map(None));
    }

    #[test]
    fn read_error_on_first_line_is_not_a_map() {
        assert_eq!(scan_map_file(Broken), MapFileScan::NotAMap);
    }
}
