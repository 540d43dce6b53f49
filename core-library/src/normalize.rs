//! Title normalisation for the title + year fallback match

const ARTICLES: &[&str] = &["the", "a", "an", "le", "la", "les", "un", "une"];

/// Normalise a title for comparison
///
/// Lower-cases, strips one leading article (English or French), replaces
/// every non-alphanumeric character with a space and collapses whitespace.
/// Accented letters are kept.
pub fn normalize_title(title: &str) -> String {
    let lowered = title.trim().to_lowercase();
    let stripped = strip_leading_article(&lowered);

    let spaced: String = stripped
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_leading_article(title: &str) -> &str {
    for elided in ["l'", "l\u{2019}"] {
        if let Some(rest) = title.strip_prefix(elided) {
            if !rest.trim().is_empty() {
                return rest;
            }
        }
    }

    for article in ARTICLES {
        if let Some(rest) = title.strip_prefix(article) {
            if rest.starts_with(char::is_whitespace) && !rest.trim().is_empty() {
                return rest;
            }
        }
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercase_and_article() {
        assert_eq!(normalize_title("THE MOVIE"), "movie");
        assert_eq!(normalize_title("A Movie"), "movie");
        assert_eq!(normalize_title("An Apple"), "apple");
    }

    #[test]
    fn test_french_articles() {
        assert_eq!(normalize_title("Le Film"), "film");
        assert_eq!(normalize_title("La Vie"), "vie");
        assert_eq!(normalize_title("Les Misérables"), "misérables");
        assert_eq!(normalize_title("Un Film"), "film");
        assert_eq!(normalize_title("Une Histoire"), "histoire");
        assert_eq!(normalize_title("L'Odyssée"), "odyssée");
    }

    #[test]
    fn test_only_leading_article_is_removed() {
        assert_eq!(normalize_title("Movie - The Sequel"), "movie the sequel");
        assert_eq!(normalize_title("Theory"), "theory");
        assert_eq!(normalize_title("The"), "the");
    }

    #[test]
    fn test_punctuation_and_whitespace() {
        assert_eq!(normalize_title("Movie: Part 2"), "movie part 2");
        assert_eq!(normalize_title("  Spaced  Out  "), "spaced out");
        assert_eq!(normalize_title("Movie123"), "movie123");
    }
}
