//! Nearest-neighbor identity matching over the encoding database.

use crate::encodings::EncodingDatabase;
use crate::types::{Embedding, MatchResult};

/// Default Euclidean accept tolerance for 128-d face embeddings.
pub const DEFAULT_TOLERANCE: f32 = 0.6;

/// Match a candidate embedding against every entry in the database.
///
/// Two independent passes over the same distance array:
/// 1. argmin with first-occurrence tie-break selects the nearest identity;
/// 2. a per-entry `distance <= tolerance` test decides accept/reject.
///
/// The accept decision is read off at the argmin index, so a vector can be
/// the nearest neighbor yet still be rejected when its distance exceeds
/// the tolerance. An empty database always yields a non-match.
pub fn match_embedding(
    candidate: &Embedding,
    db: &EncodingDatabase,
    tolerance: f32,
) -> MatchResult {
    if db.is_empty() {
        return MatchResult::no_match();
    }

    let distances: Vec<f32> = db
        .embeddings
        .iter()
        .map(|known| candidate.distance(known))
        .collect();

    let accepts: Vec<bool> = distances.iter().map(|&d| d <= tolerance).collect();

    // argmin, first occurrence wins on ties
    let mut best_idx = 0usize;
    for (i, &d) in distances.iter().enumerate() {
        if d < distances[best_idx] {
            best_idx = i;
        }
    }

    let accepted = accepts[best_idx];
    MatchResult {
        identity: if accepted {
            Some(db.identities[best_idx].clone())
        } else {
            None
        },
        accepted,
        distance: Some(distances[best_idx]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(values: &[f32]) -> Embedding {
        Embedding {
            values: values.to_vec(),
        }
    }

    fn db(entries: &[(&str, &[f32])]) -> EncodingDatabase {
        EncodingDatabase {
            embeddings: entries.iter().map(|(_, v)| emb(v)).collect(),
            identities: entries.iter().map(|(id, _)| id.to_string()).collect(),
        }
    }

    #[test]
    fn test_self_match_accepted() {
        let gallery = db(&[("alice", &[1.0, 0.0, 0.0]), ("bob", &[0.0, 1.0, 0.0])]);
        for (i, known) in gallery.embeddings.iter().enumerate() {
            let result = match_embedding(known, &gallery, DEFAULT_TOLERANCE);
            assert!(result.accepted);
            assert_eq!(result.identity.as_deref(), Some(gallery.identities[i].as_str()));
        }
    }

    #[test]
    fn test_empty_database_no_match() {
        let empty = EncodingDatabase::default();
        let result = match_embedding(&emb(&[1.0, 2.0]), &empty, DEFAULT_TOLERANCE);
        assert_eq!(result, MatchResult::no_match());
    }

    #[test]
    fn test_nearest_but_rejected() {
        // Nearest neighbor is "alice" but her distance exceeds the tolerance:
        // the match must report the rejection, not fall back to another entry.
        let gallery = db(&[("alice", &[2.0, 0.0]), ("bob", &[5.0, 0.0])]);
        let result = match_embedding(&emb(&[0.0, 0.0]), &gallery, 0.6);
        assert!(!result.accepted);
        assert_eq!(result.identity, None);
        assert!((result.distance.unwrap() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_tie_break_first_occurrence() {
        // Two entries equidistant from the probe: the lower index wins.
        let gallery = db(&[("first", &[0.1, 0.0]), ("second", &[0.0, 0.1])]);
        let result = match_embedding(&emb(&[0.0, 0.0]), &gallery, DEFAULT_TOLERANCE);
        assert_eq!(result.identity.as_deref(), Some("first"));
    }

    #[test]
    fn test_tolerance_boundary_inclusive() {
        let gallery = db(&[("edge", &[0.6, 0.0])]);
        let result = match_embedding(&emb(&[0.0, 0.0]), &gallery, 0.6);
        assert!(result.accepted, "distance == tolerance must accept");
    }

    #[test]
    fn test_nearest_of_many() {
        let gallery = db(&[
            ("far", &[3.0, 3.0]),
            ("near", &[0.1, 0.1]),
            ("mid", &[1.0, 1.0]),
        ]);
        let result = match_embedding(&emb(&[0.0, 0.0]), &gallery, DEFAULT_TOLERANCE);
        assert_eq!(result.identity.as_deref(), Some("near"));
        assert!(result.accepted);
    }
}
