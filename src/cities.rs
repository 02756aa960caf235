use std::sync::OnceLock;

use regex::Regex;

/// Cities offered by the selector, spelled as the map provider is queried with.
pub const CITIES: [&str; 48] = [
    "Adrar", "Ain Defla", "Ain Temouchent", "Alger", "Annaba", "Batna",
    "Bechar", "Bejaia", "Biskra", "Blida", "Bordj Bou Arreridj", "Bouira",
    "Boumerdes", "Chlef", "Constantine", "Djelfa", "El Bayadh", "El Oued",
    "El Tarf", "Ghardaia", "Guelma", "Illizi", "Jijel", "Khenchela",
    "Laghouat", "Muaskar", "Medea", "Mila", "Mostaganem", "Msila", "Naama",
    "Oran", "Ouargla", "Oum el Bouaghi", "Relizane", "Saida", "Setif", "Sidi Bel Abbes",
    "Skikda", "Souk Ahras", "Tamanrasset", "Tebessa", "Tiaret", "Tindouf",
    "Tipaza", "Tissemsilt", "Tizi Ouzou", "Tlemcen",
];

/// Case- and whitespace-insensitive lookup in the city list.
pub fn find_city(input: &str) -> Option<&'static str> {
    let wanted = normalize(input);
    CITIES.iter().copied().find(|city| normalize(city) == wanted)
}

pub fn place_name(city: &str, country_suffix: &str) -> String {
    format!("{}{}", city, country_suffix)
}

/// File-system friendly name, e.g. "Oum el Bouaghi" -> "oum_el_bouaghi".
pub fn slug(name: &str) -> String {
    static NON_ALNUM: OnceLock<Regex> = OnceLock::new();
    let re = NON_ALNUM.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("valid slug pattern"));
    re.replace_all(&name.to_lowercase(), "_").trim_matches('_').to_string()
}

fn normalize(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_city() {
        assert_eq!(find_city("alger"), Some("Alger"));
        assert_eq!(find_city("  tizi   OUZOU "), Some("Tizi Ouzou"));
        assert_eq!(find_city("Paris"), None);
    }

    #[test]
    fn test_place_name() {
        assert_eq!(place_name("Oran", ", Algeria"), "Oran, Algeria");
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Oum el Bouaghi"), "oum_el_bouaghi");
        assert_eq!(slug("Alger, Algeria"), "alger_algeria");
        assert_eq!(slug("--Sidi  Bel Abbes--"), "sidi_bel_abbes");
    }

    #[test]
    fn test_city_names_are_unique() {
        let mut slugs: Vec<String> = CITIES.iter().map(|c| slug(c)).collect();
        slugs.sort();
        slugs.dedup();
        assert_eq!(slugs.len(), CITIES.len());
    }
}
