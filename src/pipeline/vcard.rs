//! Minimal contact-card reader.
//!
//! Only the four fields a shared contact needs are extracted. Parsing never
//! fails; anything missing comes back as an empty string.

/// Fields extracted from a vCard.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactCard {
    pub formatted_name: String,
    pub first_name: String,
    pub phone: String,
    pub wa_id: String,
}

/// One content line: `[group.]NAME[;param=value...]:value`.
struct Property<'a> {
    name: String,
    params: Vec<(String, &'a str)>,
    value: &'a str,
}

fn parse_property(line: &str) -> Option<Property<'_>> {
    let (head, value) = line.split_once(':')?;
    let mut parts = head.split(';');
    let raw_name = parts.next()?;
    let name = raw_name
        .rsplit('.')
        .next()
        .unwrap_or(raw_name)
        .to_ascii_uppercase();
    let params = parts
        .filter_map(|param| {
            let (key, value) = param.split_once('=')?;
            Some((key.trim().to_ascii_lowercase(), value.trim()))
        })
        .collect();
    Some(Property {
        name,
        params,
        value: value.trim(),
    })
}

/// Join folded continuation lines (lines starting with a space or tab).
fn unfold(raw: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for line in raw.lines() {
        let line = line.trim_end_matches('\r');
        match (line.strip_prefix([' ', '\t']), lines.last_mut()) {
            (Some(rest), Some(previous)) => previous.push_str(rest),
            _ => lines.push(line.to_string()),
        }
    }
    lines
}

/// Read formatted name, first name and the first phone number from a vCard.
pub fn parse(vcard: &str) -> ContactCard {
    let mut card = ContactCard::default();
    let mut given_name: Option<String> = None;
    let mut phone_seen = false;

    for line in unfold(vcard) {
        let Some(prop) = parse_property(&line) else {
            continue;
        };
        match prop.name.as_str() {
            "FN" if card.formatted_name.is_empty() => {
                card.formatted_name = prop.value.to_string();
            }
            "N" if given_name.is_none() => {
                given_name = prop
                    .value
                    .split(';')
                    .nth(1)
                    .map(str::trim)
                    .filter(|given| !given.is_empty())
                    .map(str::to_string);
            }
            "TEL" if !phone_seen => {
                phone_seen = true;
                card.phone = prop.value.to_string();
                if let Some((_, waid)) = prop.params.iter().find(|(key, _)| key == "waid") {
                    card.wa_id = (*waid).to_string();
                }
            }
            _ => {}
        }
    }

    card.first_name = given_name.unwrap_or_else(|| {
        card.formatted_name
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string()
    });
    card
}
