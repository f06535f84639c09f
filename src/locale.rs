use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TextDirection {
    #[default]
    Ltr,
    Rtl,
}

impl TextDirection {
    pub fn is_rtl(self) -> bool {
        matches!(self, TextDirection::Rtl)
    }

    pub fn from_rtl(is_rtl: bool) -> Self {
        if is_rtl { TextDirection::Rtl } else { TextDirection::Ltr }
    }

    /// Labels used for the ingredient and instruction lists when the model gives none.
    pub fn default_labels(self) -> (&'static str, &'static str) {
        match self {
            TextDirection::Rtl => ("מצרכים", "אופן ההכנה"),
            TextDirection::Ltr => ("Ingredients", "Instructions"),
        }
    }

    pub fn apology(self) -> &'static str {
        match self {
            TextDirection::Rtl => "מצטערים, משהו השתבש. נסו שוב.",
            TextDirection::Ltr => "Sorry, something went wrong. Please try again.",
        }
    }

    pub fn quick_replies(self) -> Vec<String> {
        let replies: [&str; 4] = match self {
            TextDirection::Rtl => ["תעשה את זה טבעוני", "פחות זמן הכנה", "תוסיף חריפות", "תתאים ל-2 מנות"],
            TextDirection::Ltr => ["Make it vegan", "Make it quicker", "Make it spicier", "Scale it to 2 servings"],
        };
        replies.iter().map(|r| r.to_string()).collect()
    }
}

fn is_rtl_char(c: char) -> bool {
    matches!(c as u32,
        0x0590..=0x05FF // Hebrew
        | 0x0600..=0x06FF // Arabic
        | 0x0700..=0x074F // Syriac
        | 0x0750..=0x077F // Arabic supplement
        | 0x0780..=0x07BF // Thaana
        | 0x08A0..=0x08FF // Arabic extended-A
        | 0xFB1D..=0xFDFF // Hebrew and Arabic presentation forms
        | 0xFE70..=0xFEFF)
}

/// Infers the direction of free text. Any right-to-left script character wins.
pub fn detect_direction(text: &str) -> TextDirection {
    TextDirection::from_rtl(text.chars().any(is_rtl_char))
}

/// Explicit locale if given, otherwise whatever the text looks like.
pub fn resolve_direction(explicit: Option<TextDirection>, text: &str) -> TextDirection {
    explicit.unwrap_or_else(|| detect_direction(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hebrew_request_is_rtl() {
        assert_eq!(detect_direction("תן לי מרק עגבניות"), TextDirection::Rtl);
    }

    #[test]
    fn english_request_is_ltr() {
        assert_eq!(detect_direction("give me a tomato soup"), TextDirection::Ltr);
    }

    #[test]
    fn arabic_and_mixed_text_is_rtl() {
        assert_eq!(detect_direction("شوربة طماطم"), TextDirection::Rtl);
        assert_eq!(detect_direction("pasta עם עגבניות"), TextDirection::Rtl);
    }

    #[test]
    fn explicit_locale_overrides_detection() {
        assert_eq!(resolve_direction(Some(TextDirection::Ltr), "מרק"), TextDirection::Ltr);
        assert_eq!(resolve_direction(None, "מרק"), TextDirection::Rtl);
    }
}
