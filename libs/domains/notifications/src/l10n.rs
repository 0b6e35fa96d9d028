//! Built-in phrase catalogue.
//!
//! Lookups are keyed by the untranslated phrase. Unknown locales and phrases
//! without a translation fall back to the source text.

use crate::templates::phrases::{
    GROUPED, SCIENCE_MESH_INVITE, SHARE_CREATED, SHARE_EXPIRED, SHARE_REMOVED,
    SPACE_MEMBERSHIP_EXPIRED, SPACE_SHARED, SPACE_UNSHARED,
};

/// Locale the source phrases are written in.
pub const SOURCE_LOCALE: &str = "en";

const DE: &[(&str, &str)] = &[
    (SHARE_CREATED.subject, "{ShareSharer} hat '{ShareFolder}' mit Ihnen geteilt"),
    (SHARE_CREATED.greeting, "Hallo {ShareGrantee}"),
    (SHARE_CREATED.message, "{ShareSharer} hat \"{ShareFolder}\" mit Ihnen geteilt."),
    (SHARE_CREATED.call_to_action, "Zum Ansehen hier klicken: {ShareLink}"),
    (SHARE_EXPIRED.subject, "Freigabe von '{ShareFolder}' ist am {ExpiredAt} abgelaufen"),
    (SHARE_EXPIRED.greeting, "Hallo {ShareGrantee},"),
    (
        SHARE_EXPIRED.message,
        "Ihre Freigabe von {ShareFolder} ist am {ExpiredAt} abgelaufen\n\nAuch wenn diese Freigabe widerrufen wurde, haben Sie möglicherweise über andere Freigaben oder Space-Mitgliedschaften weiterhin Zugriff.",
    ),
    (SHARE_REMOVED.subject, "{ShareSharer} hat die Freigabe von '{ShareFolder}' aufgehoben"),
    (
        SHARE_REMOVED.message,
        "{ShareSharer} hat die Freigabe von '{ShareFolder}' für Sie aufgehoben.\n\nAuch wenn diese Freigabe widerrufen wurde, haben Sie möglicherweise über andere Freigaben oder Space-Mitgliedschaften weiterhin Zugriff.",
    ),
    (SPACE_SHARED.subject, "{SpaceSharer} hat Sie in den Space {SpaceName} eingeladen"),
    (SPACE_SHARED.greeting, "Hallo {SpaceGrantee},"),
    (SPACE_SHARED.message, "{SpaceSharer} hat Sie in den Space \"{SpaceName}\" eingeladen."),
    (SPACE_SHARED.call_to_action, "Zum Ansehen hier klicken: {ShareLink}"),
    (SPACE_UNSHARED.subject, "{SpaceSharer} hat Sie aus {SpaceName} entfernt"),
    (
        SPACE_UNSHARED.message,
        "{SpaceSharer} hat Sie aus dem Space \"{SpaceName}\" entfernt.\n\nÜber Ihre anderen Gruppen oder eine direkte Mitgliedschaft haben Sie möglicherweise weiterhin Zugriff.",
    ),
    (SPACE_UNSHARED.call_to_action, "Zum Überprüfen hier klicken: {ShareLink}"),
    (
        SPACE_MEMBERSHIP_EXPIRED.subject,
        "Mitgliedschaft in '{SpaceName}' ist am {ExpiredAt} abgelaufen",
    ),
    (
        SPACE_MEMBERSHIP_EXPIRED.message,
        "Ihre Mitgliedschaft im Space {SpaceName} ist am {ExpiredAt} abgelaufen\n\nAuch wenn diese Mitgliedschaft abgelaufen ist, haben Sie möglicherweise über andere Freigaben oder Space-Mitgliedschaften weiterhin Zugriff",
    ),
    (
        SCIENCE_MESH_INVITE.subject,
        "ScienceMesh: {InviteSharer} möchte mit Ihnen zusammenarbeiten",
    ),
    (SCIENCE_MESH_INVITE.greeting, "Hallo,"),
    (
        SCIENCE_MESH_INVITE.message,
        "{InviteSharer} ({InviteSharerMail}) möchte Ressourcen zur Zusammenarbeit mit Ihnen teilen.\n\nToken: {Token}\nBeschreibung: {Description}",
    ),
    (
        SCIENCE_MESH_INVITE.call_to_action,
        "Bitte öffnen Sie Ihre Föderationseinstellungen und verwenden Sie folgende Angaben: {InviteLink}",
    ),
    (GROUPED.subject, "Bericht"),
    (GROUPED.greeting, "Hallo {DisplayName},"),
];

/// Language part of a locale tag: `de-DE`, `de_DE` and `DE` all become `de`.
fn language(locale: &str) -> String {
    locale
        .split(['-', '_'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase()
}

fn catalogue(locale: &str) -> Option<&'static [(&'static str, &'static str)]> {
    match language(locale).as_str() {
        "de" => Some(DE),
        _ => None,
    }
}

/// Translate `phrase` into `locale`, or return it unchanged.
pub fn translate<'a>(locale: &str, phrase: &'a str) -> &'a str {
    if phrase.is_empty() {
        return phrase;
    }
    catalogue(locale)
        .and_then(|entries| entries.iter().find(|(source, _)| *source == phrase))
        .map(|(_, translated)| *translated)
        .unwrap_or(phrase)
}

/// Whether a catalogue exists for `locale` (the source locale always does).
#[cfg(test)]
fn is_supported(locale: &str) -> bool {
    let lang = language(locale);
    lang == SOURCE_LOCALE || catalogue(&lang).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_german() {
        assert_eq!(translate("de", GROUPED.subject), "Bericht");
        assert_eq!(translate("de-DE", GROUPED.greeting), "Hallo {DisplayName},");
        assert_eq!(translate("DE_at", SHARE_CREATED.greeting), "Hallo {ShareGrantee}");
    }

    #[test]
    fn test_fallback_to_source() {
        assert_eq!(translate("en", SHARE_CREATED.subject), SHARE_CREATED.subject);
        assert_eq!(translate("xx", GROUPED.subject), "Report");
        assert_eq!(translate("de", "Not in the catalogue"), "Not in the catalogue");
        assert_eq!(translate("de", ""), "");
    }

    #[test]
    fn test_placeholders_survive_translation() {
        for template in crate::templates::phrases::ALL {
            for phrase in [template.subject, template.greeting, template.message, template.call_to_action] {
                let translated = translate("de", phrase);
                let mut wanted: Vec<_> = placeholders(phrase);
                let mut got: Vec<_> = placeholders(translated);
                wanted.sort();
                got.sort();
                assert_eq!(wanted, got, "placeholders differ for {phrase:?}");
            }
        }
    }

    fn placeholders(s: &str) -> Vec<&str> {
        s.split('{')
            .skip(1)
            .filter_map(|rest| rest.split_once('}').map(|(name, _)| name))
            .collect()
    }

    #[test]
    fn test_is_supported() {
        assert!(is_supported("en"));
        assert!(is_supported("de-CH"));
        assert!(!is_supported("fr"));
    }
}
