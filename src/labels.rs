use std::collections::BTreeMap;

/// Species labels the vendor's classifier emits, with display names.
/// Sensor state is keyed by this set; anything else in a prediction is
/// still eligible as a top pick but gets no dedicated sensor.
pub const KNOWN_LABELS: [(&str, &str); 6] = [
    ("CAPREOLUS", "Roe deer (Capreolus capreolus)"),
    ("CERVUS_ELAPHUS", "Red deer (Cervus elaphus)"),
    ("SUS_SCROFA", "Wild boar (Sus scrofa)"),
    ("DAMA_DAMA", "Fallow deer (Dama dama)"),
    ("MELES", "Badger (Meles meles)"),
    ("ALCES", "Moose (Alces alces)"),
];

pub fn readable_name(label: &str) -> Option<&'static str> {
    KNOWN_LABELS
        .iter()
        .find(|(key, _)| *key == label)
        .map(|(_, name)| *name)
}

/// Fresh snapshot with every known label zeroed.
pub fn empty_counts() -> BTreeMap<String, u8> {
    KNOWN_LABELS
        .iter()
        .map(|(key, _)| (key.to_string(), 0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_counts_covers_exactly_the_known_label_set() {
        let counts = empty_counts();
        assert_eq!(counts.len(), KNOWN_LABELS.len());
        for (label, _) in KNOWN_LABELS {
            assert_eq!(counts.get(label), Some(&0));
        }
    }

    #[test]
    fn readable_name_resolves_known_labels_only() {
        assert_eq!(readable_name("MELES"), Some("Badger (Meles meles)"));
        assert_eq!(readable_name("FELIS"), None);
    }
}
