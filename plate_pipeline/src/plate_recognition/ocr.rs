use image::GrayImage;

/// One text-recognition engine behind a single capability: read a prepared
/// (binarized, cropped, margin-padded) plate image. An empty string means
/// "no observation this frame", not an error. The engine is selected at
/// construction time; the pipeline never knows which one it talks to.
pub trait Recognizer: Send + Sync {
    fn recognize(&self, plate: &GrayImage) -> String;
}

/// Engine that never reads anything. Lets the pipeline run (detection,
/// tracking, shedding) without a text engine wired in.
pub struct NullRecognizer;

impl Recognizer for NullRecognizer {
    fn recognize(&self, _plate: &GrayImage) -> String {
        String::new()
    }
}

// Characters a recognizer confuses in positions where only letters are legal.
fn digit_to_letter(c: char) -> char {
    match c {
        '0' => 'O',
        '1' => 'I',
        '2' => 'Z',
        '5' => 'S',
        '7' => 'Z',
        '8' => 'B',
        other => other,
    }
}

// And the reverse for positions where only digits are legal.
fn letter_to_digit(c: char) -> char {
    match c {
        'B' => '8',
        'D' => '0',
        'I' => '1',
        'O' => '0',
        'Z' => '2',
        other => other,
    }
}

/// Normalize a raw engine reading into plate alphabet form: uppercase, strip
/// everything outside 0-9/A-Z, drop a leading I/1 recognition artifact, then
/// apply position-dependent confusion fixes (letters lead, digits follow).
pub fn normalize_reading(raw: &str) -> String {
    let mut chars: Vec<char> = raw
        .chars()
        .map(|c| c.to_ascii_uppercase())
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        .collect();

    // A stray vertical stroke at the start is almost always the plate frame,
    // not a character.
    if matches!(chars.first(), Some('I') | Some('1')) {
        chars.remove(0);
    }

    for (i, c) in chars.iter_mut().enumerate() {
        if i < 2 {
            *c = digit_to_letter(*c);
        } else if i < 8 {
            *c = letter_to_digit(*c);
        }
    }

    chars.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_illegal_characters() {
        assert_eq!(normalize_reading("wa-6102*x"), "WA6102X");
        assert_eq!(normalize_reading("  "), "");
    }

    #[test]
    fn drops_leading_stroke_artifact() {
        assert_eq!(normalize_reading("IWA61020"), "WA61020");
        assert_eq!(normalize_reading("1WA61020"), "WA61020");
    }

    #[test]
    fn fixes_confusions_by_position() {
        // Digits read in the letter positions.
        assert_eq!(normalize_reading("08C1234"), "OBC1234");
        // Letters read in the digit positions.
        assert_eq!(normalize_reading("KRDZ0B1"), "KR02081");
    }

    #[test]
    fn null_recognizer_reads_nothing() {
        let plate = GrayImage::new(8, 8);
        assert_eq!(NullRecognizer.recognize(&plate), "");
    }
}
