//! Per-run lookup index over a library's items
//!
//! Built once per collection run from [`MediaServer::library_items`] and
//! dropped afterwards, so it always reflects the catalogue as it is now.
//!
//! [`MediaServer::library_items`]: crate::jellyfin::MediaServer::library_items

use crate::models::{ExternalItemRef, ItemId, LibraryItem, MediaType};
use crate::normalize::normalize_title;
use std::collections::HashMap;

const YEAR_TOLERANCE: i32 = 1;

#[derive(Debug, Clone)]
struct TitleEntry {
    year: Option<i32>,
    id: ItemId,
}

#[derive(Debug, Clone, Default)]
pub struct LibraryIndex {
    by_tmdb: HashMap<(MediaType, u64), ItemId>,
    by_imdb: HashMap<String, ItemId>,
    by_tvdb: HashMap<(MediaType, u64), ItemId>,
    by_title: HashMap<(MediaType, String), Vec<TitleEntry>>,
    len: usize,
}

impl LibraryIndex {
    /// Index items by every id they carry and by normalised title.
    /// On id collisions the first item wins.
    pub fn build<I>(items: I) -> Self
    where
        I: IntoIterator<Item = LibraryItem>,
    {
        let mut index = Self::default();

        for item in items {
            let ids = item.ids.normalized();
            if let Some(tmdb) = ids.tmdb {
                index
                    .by_tmdb
                    .entry((item.media_type, tmdb))
                    .or_insert_with(|| item.id.clone());
            }
            if let Some(imdb) = ids.imdb {
                index.by_imdb.entry(imdb).or_insert_with(|| item.id.clone());
            }
            if let Some(tvdb) = ids.tvdb {
                index
                    .by_tvdb
                    .entry((item.media_type, tvdb))
                    .or_insert_with(|| item.id.clone());
            }

            let title = normalize_title(&item.title);
            if !title.is_empty() {
                index
                    .by_title
                    .entry((item.media_type, title))
                    .or_default()
                    .push(TitleEntry {
                        year: item.year,
                        id: item.id,
                    });
            }
            index.len += 1;
        }

        index
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Resolve a reference: exact id match first, then the title + year
    /// fallback for references that carry no id at all.
    pub fn lookup(&self, reference: &ExternalItemRef) -> Option<&ItemId> {
        if reference.has_ids() {
            return self.lookup_by_ids(reference);
        }
        self.lookup_by_title(reference.media_type, &reference.title, reference.year)
    }

    pub fn lookup_by_ids(&self, reference: &ExternalItemRef) -> Option<&ItemId> {
        let ids = reference.ids.normalized();
        let media_type = reference.media_type;

        ids.tmdb
            .and_then(|id| self.by_tmdb.get(&(media_type, id)))
            .or_else(|| ids.imdb.as_ref().and_then(|id| self.by_imdb.get(id)))
            .or_else(|| ids.tvdb.and_then(|id| self.by_tvdb.get(&(media_type, id))))
    }

    /// Title match within the same media type
    ///
    /// With a year, an exact year wins, otherwise a single candidate within
    /// one year (or without a known year) is accepted. Without a year the
    /// title must be unique in the library.
    pub fn lookup_by_title(
        &self,
        media_type: MediaType,
        title: &str,
        year: Option<i32>,
    ) -> Option<&ItemId> {
        let candidates = self.by_title.get(&(media_type, normalize_title(title)))?;

        let Some(year) = year else {
            return match candidates.as_slice() {
                [only] => Some(&only.id),
                _ => None,
            };
        };

        if let Some(exact) = candidates.iter().find(|c| c.year == Some(year)) {
            return Some(&exact.id);
        }

        let mut close = candidates.iter().filter(|c| match c.year {
            Some(candidate) => (candidate - year).abs() <= YEAR_TOLERANCE,
            None => true,
        });
        match (close.next(), close.next()) {
            (Some(found), None) => Some(&found.id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExternalIds;

    fn item(id: &str, title: &str, year: Option<i32>, tmdb: Option<u64>) -> LibraryItem {
        LibraryItem {
            id: ItemId::from(id),
            title: title.to_string(),
            year,
            media_type: MediaType::Movie,
            ids: ExternalIds {
                tmdb,
                imdb: None,
                tvdb: None,
            },
        }
    }

    fn sample() -> LibraryIndex {
        LibraryIndex::build(vec![
            item("jf-001", "Dune: Part Two", Some(2024), Some(693134)),
            item("jf-002", "Oppenheimer", Some(2023), Some(872585)),
            item("jf-003", "The Batman", Some(2022), Some(414906)),
            LibraryItem {
                ids: ExternalIds {
                    tmdb: None,
                    imdb: Some("tt1234567".into()),
                    tvdb: None,
                },
                ..item("jf-004", "Something", Some(2010), None)
            },
        ])
    }

    #[test]
    fn test_lookup_by_tmdb_id_ignores_title() {
        let index = sample();
        let reference = ExternalItemRef::new(MediaType::Movie, "Different Title").with_tmdb(693134);
        assert_eq!(index.lookup(&reference), Some(&ItemId::from("jf-001")));
    }

    #[test]
    fn test_lookup_by_imdb_id_is_case_insensitive() {
        let index = sample();
        let reference = ExternalItemRef::new(MediaType::Movie, "x").with_imdb("TT1234567");
        assert_eq!(index.lookup(&reference), Some(&ItemId::from("jf-004")));
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let index = sample();
        let reference = ExternalItemRef::new(MediaType::Movie, "Oppenheimer")
            .with_year(2023)
            .with_tmdb(999999);
        assert_eq!(index.lookup(&reference), None);
    }

    #[test]
    fn test_series_ids_do_not_match_movies() {
        let index = sample();
        let reference = ExternalItemRef::new(MediaType::Series, "Dune").with_tmdb(693134);
        assert_eq!(index.lookup(&reference), None);
    }

    #[test]
    fn test_title_fallback_with_year_tolerance() {
        let index = sample();
        let exact = ExternalItemRef::new(MediaType::Movie, "Batman").with_year(2022);
        let close = ExternalItemRef::new(MediaType::Movie, "the batman").with_year(2023);
        let far = ExternalItemRef::new(MediaType::Movie, "The Batman").with_year(2019);

        assert_eq!(index.lookup(&exact), Some(&ItemId::from("jf-003")));
        assert_eq!(index.lookup(&close), Some(&ItemId::from("jf-003")));
        assert_eq!(index.lookup(&far), None);
    }

    #[test]
    fn test_title_without_year_must_be_unique() {
        let index = LibraryIndex::build(vec![
            item("a", "Dune", Some(1984), None),
            item("b", "Dune", Some(2021), None),
            item("c", "Heat", Some(1995), None),
        ]);

        assert_eq!(
            index.lookup(&ExternalItemRef::new(MediaType::Movie, "Dune")),
            None
        );
        assert_eq!(
            index.lookup(&ExternalItemRef::new(MediaType::Movie, "Dune").with_year(2021)),
            Some(&ItemId::from("b"))
        );
        assert_eq!(
            index.lookup(&ExternalItemRef::new(MediaType::Movie, "Heat")),
            Some(&ItemId::from("c"))
        );
    }

    #[test]
    fn test_ambiguous_tolerance_match_is_rejected() {
        let index = LibraryIndex::build(vec![
            item("a", "Twin", Some(2000), None),
            item("b", "Twin", Some(2002), None),
        ]);
        let reference = ExternalItemRef::new(MediaType::Movie, "Twin").with_year(2001);
        assert_eq!(index.lookup(&reference), None);
    }
}
