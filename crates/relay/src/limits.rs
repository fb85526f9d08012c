//! Discord payload limits.
//!
//! Oversized text is cut so the result is exactly the limit long, with the
//! tail replaced by [`TRUNCATION_MARKER`]. Lengths are counted in chars.

use hookcord_protocol::{Embed, OutboundMessage};

use crate::delivery::DeliveryError;

pub const TRUNCATION_MARKER: &str = "...";

pub const TITLE_MAX: usize = 256;
pub const DESCRIPTION_MAX: usize = 4096;
pub const FIELD_NAME_MAX: usize = 256;
pub const FIELD_VALUE_MAX: usize = 1024;
pub const FIELDS_MAX: usize = 25;
pub const FOOTER_MAX: usize = 2048;
pub const CONTENT_MAX: usize = 2000;
/// Sum of title, description, field names/values and footer
pub const EMBED_TOTAL_MAX: usize = 6000;
pub const THREAD_NAME_MAX: usize = 100;

/// Cut `text` to exactly `limit` chars ending in the marker. `None` when it already fits.
pub fn truncate_chars(text: &str, limit: usize) -> Option<String> {
    let len = text.chars().count();
    if len <= limit {
        return None;
    }
    let marker_len = TRUNCATION_MARKER.chars().count();
    if limit <= marker_len {
        return Some(TRUNCATION_MARKER.chars().take(limit).collect());
    }
    let mut out: String = text.chars().take(limit - marker_len).collect();
    out.push_str(TRUNCATION_MARKER);
    Some(out)
}

/// Bring `message` within every limit. Returns one `Truncated` per field that
/// had to be cut; the message is never dropped.
pub fn enforce(message: &mut OutboundMessage) -> Vec<DeliveryError> {
    let mut cuts = Vec::new();

    if let Some(content) = message.content.as_mut() {
        clip(content, CONTENT_MAX, "content", &mut cuts);
    }

    let embed = &mut message.embed;
    clip(&mut embed.title, TITLE_MAX, "title", &mut cuts);
    clip(&mut embed.description, DESCRIPTION_MAX, "description", &mut cuts);

    if embed.fields.len() > FIELDS_MAX {
        cuts.push(DeliveryError::Truncated {
            field: "fields",
            original: embed.fields.len(),
            limit: FIELDS_MAX,
        });
        embed.fields.truncate(FIELDS_MAX);
    }
    for field in &mut embed.fields {
        clip(&mut field.name, FIELD_NAME_MAX, "field name", &mut cuts);
        clip(&mut field.value, FIELD_VALUE_MAX, "field value", &mut cuts);
    }
    if let Some(footer) = embed.footer.as_mut() {
        clip(&mut footer.text, FOOTER_MAX, "footer", &mut cuts);
    }

    // Trailing fields go first when everything but the description is
    // already over the combined budget; the description absorbs the rest.
    if non_description_len(embed) > EMBED_TOTAL_MAX {
        let original = embed.fields.len();
        while non_description_len(embed) > EMBED_TOTAL_MAX && embed.fields.pop().is_some() {}
        cuts.push(DeliveryError::Truncated {
            field: "fields",
            original,
            limit: embed.fields.len(),
        });
    }
    let room = EMBED_TOTAL_MAX.saturating_sub(non_description_len(embed));
    clip(&mut embed.description, room, "embed total", &mut cuts);

    cuts
}

/// Title, field names/values and footer
fn non_description_len(embed: &Embed) -> usize {
    embed.title.chars().count()
        + embed
            .fields
            .iter()
            .map(|f| f.name.chars().count() + f.value.chars().count())
            .sum::<usize>()
        + embed
            .footer
            .as_ref()
            .map_or(0, |f| f.text.chars().count())
}

fn clip(text: &mut String, limit: usize, field: &'static str, cuts: &mut Vec<DeliveryError>) {
    let original = text.chars().count();
    if let Some(cut) = truncate_chars(text, limit) {
        *text = cut;
        cuts.push(DeliveryError::Truncated {
            field,
            original,
            limit,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookcord_protocol::{EmbedField, EmbedFooter};

    #[test]
    fn fits_untouched() {
        assert_eq!(truncate_chars("hello", 5), None);
    }

    #[test]
    fn truncates_to_exact_limit_with_marker() {
        for overflow in [1, 7, 500] {
            let text = "x".repeat(DESCRIPTION_MAX + overflow);
            let cut = truncate_chars(&text, DESCRIPTION_MAX).expect("over limit");
            assert_eq!(cut.chars().count(), DESCRIPTION_MAX);
            assert!(cut.ends_with(TRUNCATION_MARKER));
            // Same input, same output
            assert_eq!(truncate_chars(&text, DESCRIPTION_MAX), Some(cut));
        }
    }

    #[test]
    fn counts_chars_not_bytes() {
        let text = "é".repeat(10);
        let cut = truncate_chars(&text, 5).unwrap();
        assert_eq!(cut, "éé...");
    }

    #[test]
    fn enforce_reports_each_cut() {
        let mut msg = OutboundMessage::new(Embed {
            title: "t".repeat(300),
            description: "d".repeat(10),
            color: 0,
            fields: vec![EmbedField::new("name", "v".repeat(2000))],
            footer: Some(EmbedFooter {
                text: "footer".to_string(),
            }),
            timestamp: None,
        });

        let cuts = enforce(&mut msg);
        assert_eq!(cuts.len(), 2);
        assert_eq!(msg.embed.title.chars().count(), TITLE_MAX);
        assert_eq!(msg.embed.fields[0].value.chars().count(), FIELD_VALUE_MAX);
        assert_eq!(msg.embed.description, "d".repeat(10));
    }

    #[test]
    fn description_absorbs_total_overflow() {
        let mut msg = OutboundMessage::new(Embed {
            title: "t".repeat(TITLE_MAX),
            description: "d".repeat(DESCRIPTION_MAX),
            color: 0,
            fields: (0..2)
                .map(|i| EmbedField::new(format!("f{}", i), "v".repeat(FIELD_VALUE_MAX)))
                .collect(),
            footer: None,
            timestamp: None,
        });

        let cuts = enforce(&mut msg);
        assert_eq!(cuts.len(), 1);
        let total = msg.embed.title.chars().count()
            + msg.embed.description.chars().count()
            + msg
                .embed
                .fields
                .iter()
                .map(|f| f.name.chars().count() + f.value.chars().count())
                .sum::<usize>();
        assert_eq!(total, EMBED_TOTAL_MAX);
    }

    #[test]
    fn trailing_fields_dropped_when_total_still_too_big() {
        let mut msg = OutboundMessage::new(Embed {
            title: "t".repeat(10),
            description: "d".repeat(10),
            color: 0,
            fields: (0..FIELDS_MAX)
                .map(|_| EmbedField::new("n".repeat(FIELD_NAME_MAX), "v".repeat(FIELD_VALUE_MAX)))
                .collect(),
            footer: None,
            timestamp: None,
        });

        let cuts = enforce(&mut msg);
        assert_eq!(cuts.len(), 1);
        assert_eq!(msg.embed.fields.len(), 4);
        assert_eq!(msg.embed.description, "d".repeat(10));
        assert!(non_description_len(&msg.embed) + 10 <= EMBED_TOTAL_MAX);
    }
}
