//! Commentary prompt and fallback templates
//!
//! The prompt constrains the model to three labeled sections so the
//! output renders consistently. The fallback template produces the
//! same three sections deterministically from title + section when
//! generation fails for good.

use newsforge_common::models::Section;

/// The labeled sections every commentary carries
pub const COMMENTARY_SECTIONS: [&str; 3] = ["Key Points", "Impact Analysis", "Future Outlook"];

/// Build the generation prompt for one article
pub fn build_commentary_prompt(title: &str, abstract_text: &str, section: Section) -> String {
    format!(
        "You are a news analyst. Write analytical commentary for the following {section} article.\n\
         \n\
         Title: {title}\n\
         Summary: {abstract_text}\n\
         \n\
         Structure your response as exactly three labeled sections:\n\
         \n\
         Key Points\n\
         2-3 complete sentences covering the essential facts.\n\
         \n\
         Impact Analysis\n\
         2-3 complete sentences on who is affected and how.\n\
         \n\
         Future Outlook\n\
         2-3 complete sentences on likely developments.\n\
         \n\
         Use plain prose under each label. No markdown, no bullet points.",
        section = section.as_str(),
        title = title,
        abstract_text = abstract_text,
    )
}

/// Deterministic commentary used when AI generation permanently
/// fails. Same input, same output; the article still reads complete.
pub fn fallback_commentary(title: &str, section: Section) -> String {
    let section_name = section.as_str();
    format!(
        "Key Points\n\
         This {section_name} story, \"{title}\", is developing and details continue to emerge. \
         The report covers events significant enough to draw coverage across the {section_name} desk. \
         Readers should treat early figures and quotes as provisional.\n\
         \n\
         Impact Analysis\n\
         Developments of this kind tend to ripple beyond their immediate subject, affecting readers who follow {section_name} closely. \
         The full consequences will depend on how the principal parties respond in the coming days.\n\
         \n\
         Future Outlook\n\
         Further reporting is expected as sources confirm additional details. \
         Follow-up coverage in the {section_name} section will track how the situation evolves.",
        section_name = section_name,
        title = title,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_names_all_three_sections() {
        let p = build_commentary_prompt("A title", "A summary", Section::Business);
        for header in COMMENTARY_SECTIONS {
            assert!(p.contains(header), "prompt missing '{}'", header);
        }
        assert!(p.contains("A title"));
        assert!(p.contains("business"));
    }

    #[test]
    fn fallback_is_deterministic_and_structured() {
        let a = fallback_commentary("Rates hold steady", Section::Finance);
        let b = fallback_commentary("Rates hold steady", Section::Finance);
        assert_eq!(a, b);
        for header in COMMENTARY_SECTIONS {
            assert!(a.contains(header), "fallback missing '{}'", header);
        }
        assert!(a.contains("Rates hold steady"));
        assert!(!a.trim().is_empty());
    }

    #[test]
    fn fallback_varies_by_input() {
        let a = fallback_commentary("Story one", Section::World);
        let b = fallback_commentary("Story two", Section::World);
        assert_ne!(a, b);
    }
}
