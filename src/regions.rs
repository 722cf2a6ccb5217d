//! Static geography tables used to pre-process user questions.
//!
//! The query model has no dependable notion of which countries belong to
//! a region, so region names found in a question are expanded here into
//! an explicit country list that is appended to the prompt. Country names
//! match the spelling the feed uses for `primary_country`.

/// A named region and the countries it expands to.
#[derive(Debug)]
pub struct Region {
    /// Lowercase phrase matched against the question.
    pub name: &'static str,
    /// Lowercase phrases containing `name` that must not trigger it
    /// (e.g. "south africa" is a country, not the region).
    pub excluded_phrases: &'static [&'static str],
    pub countries: &'static [&'static str],
}

/// A user-facing country name and the feed's canonical form.
#[derive(Debug)]
pub struct NameAlias {
    pub alias: &'static str,
    pub canonical: &'static str,
}

pub const NAME_ALIASES: &[NameAlias] = &[
    NameAlias {
        alias: "Turkey",
        canonical: "Türkiye",
    },
    NameAlias {
        alias: "Palestine",
        canonical: "occupied Palestinian territory",
    },
];

pub const REGIONS: &[Region] = &[
    Region {
        name: "asia",
        excluded_phrases: &[],
        countries: &[
            "India", "China", "Japan", "Indonesia", "Pakistan", "Bangladesh", "Nepal",
            "Philippines", "Thailand", "Myanmar", "Laos", "Kazakhstan", "Tajikistan",
            "Turkmenistan", "Russia", "Bhutan", "Sri Lanka", "South Korea", "North Korea",
            "Vietnam", "Yemen", "Uzbekistan", "Malaysia", "Singapore", "Mongolia", "Türkiye",
        ],
    },
    Region {
        name: "europe",
        excluded_phrases: &[],
        countries: &[
            "Germany", "France", "Italy", "Spain", "United Kingdom", "Sweden", "Norway",
            "Poland", "Switzerland", "Portugal", "Hungary", "Greece", "Serbia", "Ukraine",
            "Moldova", "Lithuania", "Finland", "Croatia", "Belarus", "Slovakia", "Austria",
            "Albania", "Bulgaria", "Latvia", "Russia", "Netherlands", "Ireland",
            "Bosnia and Herzegovina", "Estonia", "Iceland", "Greenland", "Cyprus", "Malta",
        ],
    },
    Region {
        name: "africa",
        excluded_phrases: &["south africa", "central african republic"],
        countries: &[
            "Nigeria", "Ethiopia", "Egypt", "Democratic Republic of the Congo", "Tanzania",
            "South Africa", "Kenya", "Sudan", "South Sudan", "Uganda", "Algeria", "Angola",
            "Morocco", "Mozambique", "Ghana", "Madagascar", "Côte d'Ivoire", "Cameroon",
            "Niger", "Mali", "Burkina Faso", "Malawi", "Zambia", "Chad", "Somalia", "Senegal",
            "Zimbabwe", "Guinea", "Benin", "Rwanda", "Burundi", "Tunisia", "Togo",
            "Sierra Leone", "Libya", "Congo", "Liberia", "Central African Republic",
            "Mauritania", "Eritrea", "Namibia", "Gambia", "Gabon", "Botswana", "Lesotho",
            "Guinea-Bissau", "Equatorial Guinea", "Mauritius", "Eswatini", "Djibouti",
            "Comoros", "Seychelles",
        ],
    },
    Region {
        name: "south america",
        excluded_phrases: &[],
        countries: &[
            "Brazil", "Argentina", "Chile", "Colombia", "Peru", "Bolivia", "Ecuador", "Guyana",
            "Paraguay", "Suriname", "Uruguay", "Venezuela",
        ],
    },
    Region {
        name: "north america",
        excluded_phrases: &[],
        countries: &[
            "United States", "Canada", "Mexico", "Bahamas", "Belize", "Costa Rica", "Cuba",
            "Dominican Republic", "El Salvador", "Grenada", "Guatemala", "Jamaica", "Haiti",
            "Honduras", "Nicaragua", "Panama", "Saint Kitts and Nevis", "Saint Lucia",
            "Saint Vincent and the Grenadines", "Trinidad and Tobago",
        ],
    },
    Region {
        name: "middle east",
        excluded_phrases: &[],
        countries: &[
            "Iran", "Iraq", "Syria", "Saudi Arabia", "Jordan", "Israel", "Yemen",
            "United Arab Emirates", "Lebanon", "Oman", "Qatar", "occupied Palestinian territory",
            "Kuwait", "Bahrain", "Türkiye",
        ],
    },
];

/// Regions mentioned in `text`, in table order.
pub fn regions_mentioned(text: &str) -> Vec<&'static Region> {
    let lowered = text.to_lowercase();
    REGIONS
        .iter()
        .filter(|region| {
            let mut haystack = lowered.clone();
            for phrase in region.excluded_phrases {
                haystack = haystack.replace(phrase, " ");
            }
            contains_word(&haystack, region.name)
        })
        .collect()
}

/// The hint appended to the prompt for each region found in `text`.
pub fn expansion_hint(text: &str) -> String {
    regions_mentioned(text)
        .iter()
        .map(|region| {
            format!(
                " (Note: {} includes {})",
                title_case(region.name),
                region.countries.join(", ")
            )
        })
        .collect()
}

/// `needle` occurs in `haystack` with no letter directly before or after it.
fn contains_word(haystack: &str, needle: &str) -> bool {
    let mut from = 0;
    while let Some(pos) = haystack[from..].find(needle) {
        let start = from + pos;
        let end = start + needle.len();
        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric());
        let after_ok = haystack[end..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric());
        if before_ok && after_ok {
            return true;
        }
        from = end;
    }
    false
}

fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(text: &str) -> Vec<&'static str> {
        regions_mentioned(text).iter().map(|r| r.name).collect()
    }

    #[test]
    fn test_finds_regions_case_insensitively() {
        assert_eq!(names("earthquakes in Asia last week"), vec!["asia"]);
        assert_eq!(
            names("Floods in EUROPE or the Middle East?"),
            vec!["europe", "middle east"]
        );
    }

    #[test]
    fn test_country_named_after_region_is_not_region() {
        assert!(names("drought in South Africa").is_empty());
        assert!(names("Central African Republic displacement").is_empty());
        assert_eq!(names("South Africa and the rest of Africa"), vec!["africa"]);
    }

    #[test]
    fn test_requires_word_boundaries() {
        assert!(names("eurasian plate").is_empty());
        assert!(names("asian monsoon").is_empty());
    }

    #[test]
    fn test_expansion_hint_lists_countries() {
        let hint = expansion_hint("earthquakes in Asia last week");
        assert!(hint.starts_with(" (Note: Asia includes India, China, Japan"));
        assert!(hint.contains("Türkiye"));
        assert_eq!(expansion_hint("nothing regional here"), "");
    }

    #[test]
    fn test_multi_word_title_case() {
        let hint = expansion_hint("storms in south america");
        assert!(hint.contains("South America includes Brazil"));
    }

    #[test]
    fn test_tables_have_no_duplicate_countries() {
        for region in REGIONS {
            let mut seen = std::collections::HashSet::new();
            for country in region.countries {
                assert!(seen.insert(*country), "{} repeats {}", region.name, country);
            }
        }
    }
}
