use log::debug;
use rand::{seq::SliceRandom, Rng};

use crate::{
    catalog::{Catalog, Enhancement, EnhancementType},
    facedata::FaceDetail,
};

/// One planned enhancement: a category plus the concrete type to click.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub category: String,
    pub type_name: String,
    pub scroll_requirement: u32,
}

/// Decide which enhancements to apply to one face.
///
/// Categories with a gender requirement are skipped on mismatch. Beards are
/// forced whenever the face already has a beard or mustache; everything else
/// is drawn against the category probability. Deterministic under a seeded
/// rng.
pub fn plan_enhancements(
    catalog: &Catalog,
    face: &FaceDetail,
    rng: &mut impl Rng,
) -> Vec<Decision> {
    let mut decisions = Vec::new();
    for enhancement in &catalog.enhancements {
        if let Some(required) = enhancement.gender_requirement {
            if required != face.gender.value {
                continue;
            }
        }

        let forced =
            enhancement.name == "Beards" && (face.beard.value || face.mustache.value);
        if !forced && rng.random::<f64>() > enhancement.probability {
            continue;
        }

        if let Some(selected) = select_type(enhancement, rng) {
            debug!(
                "planned {} / {} (forced: {forced})",
                enhancement.name, selected.name
            );
            decisions.push(Decision {
                category: enhancement.name.clone(),
                type_name: selected.name.clone(),
                scroll_requirement: selected.scroll_requirement,
            });
        }
    }
    decisions
}

/// Scan the shuffled types, drawing each against its probability. A miss
/// inflates that type's probability by 1.2x (capped at 1) so repeated passes
/// converge; the order is reshuffled between passes to avoid positional bias.
fn select_type(enhancement: &Enhancement, rng: &mut impl Rng) -> Option<EnhancementType> {
    let mut types: Vec<EnhancementType> = enhancement
        .types
        .iter()
        .filter(|t| t.probability > 0.0)
        .cloned()
        .collect();
    if types.is_empty() {
        return None;
    }
    loop {
        types.shuffle(rng);
        for t in types.iter_mut() {
            if rng.random::<f64>() <= t.probability {
                return Some(t.clone());
            }
            t.probability = (t.probability * 1.2).min(1.0);
        }
    }
}

#[cfg(test)]
mod test {
    use rand::{rngs::StdRng, SeedableRng};

    use crate::facedata::{AgeRange, BoolAttribute, FaceDetail, Gender, GenderAttribute};

    use super::*;

    fn face(gender: Gender, beard: bool, mustache: bool) -> FaceDetail {
        FaceDetail {
            age_range: AgeRange { low: 25, high: 40 },
            gender: GenderAttribute { value: gender },
            beard: BoolAttribute { value: beard },
            mustache: BoolAttribute { value: mustache },
            eyeglasses: BoolAttribute::default(),
            sunglasses: BoolAttribute::default(),
        }
    }

    #[test]
    fn gender_requirement_filters_categories() {
        let catalog = Catalog::default();
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let plan = plan_enhancements(&catalog, &face(Gender::Male, false, false), &mut rng);
            assert!(
                plan.iter().all(|d| d.category != "Makeup"),
                "seed {seed} planned Makeup for a male face"
            );
        }
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let plan = plan_enhancements(&catalog, &face(Gender::Female, false, false), &mut rng);
            assert!(
                plan.iter().all(|d| d.category != "Beards"),
                "seed {seed} planned Beards for a female face"
            );
        }
    }

    #[test]
    fn beard_or_mustache_forces_the_beards_category() {
        let catalog = Catalog::default();
        for seed in 0..50 {
            let mut rng = StdRng::seed_from_u64(seed);
            let plan = plan_enhancements(&catalog, &face(Gender::Male, true, false), &mut rng);
            assert!(
                plan.iter().any(|d| d.category == "Beards"),
                "seed {seed} dropped Beards despite a beard"
            );

            let mut rng = StdRng::seed_from_u64(seed);
            let plan = plan_enhancements(&catalog, &face(Gender::Male, false, true), &mut rng);
            assert!(
                plan.iter().any(|d| d.category == "Beards"),
                "seed {seed} dropped Beards despite a mustache"
            );
        }
    }

    #[test]
    fn selection_terminates_despite_tiny_probabilities() {
        let enhancement = Enhancement {
            name: "Sizes".to_string(),
            probability: 1.0,
            gender_requirement: None,
            types: vec![
                EnhancementType {
                    name: "Rare".to_string(),
                    probability: 0.001,
                    scroll_requirement: 0,
                },
                EnhancementType {
                    name: "Never".to_string(),
                    probability: 0.0,
                    scroll_requirement: 0,
                },
            ],
        };
        let mut rng = StdRng::seed_from_u64(42);
        let selected = select_type(&enhancement, &mut rng).unwrap();
        assert_eq!(selected.name, "Rare");
    }

    #[test]
    fn all_zero_probabilities_select_nothing() {
        let enhancement = Enhancement {
            name: "Empty".to_string(),
            probability: 1.0,
            gender_requirement: None,
            types: vec![EnhancementType {
                name: "Never".to_string(),
                probability: 0.0,
                scroll_requirement: 0,
            }],
        };
        let mut rng = StdRng::seed_from_u64(1);
        assert!(select_type(&enhancement, &mut rng).is_none());
    }

    #[test]
    fn certain_catalog_plans_every_eligible_category() {
        let catalog = Catalog::default().force_certain();
        let mut rng = StdRng::seed_from_u64(9);
        let plan = plan_enhancements(&catalog, &face(Gender::Female, false, false), &mut rng);
        let categories: Vec<_> = plan.iter().map(|d| d.category.as_str()).collect();
        assert_eq!(categories, vec!["Makeup", "Sizes"]);
    }

    #[test]
    fn decisions_carry_scroll_requirements() {
        let catalog = Catalog::default().force_certain();
        for seed in 0..100 {
            let mut rng = StdRng::seed_from_u64(seed);
            let plan = plan_enhancements(&catalog, &face(Gender::Female, false, false), &mut rng);
            for d in &plan {
                if d.type_name.contains("Dark") || d.type_name == "Bright Glossy" {
                    assert_eq!(d.scroll_requirement, 800, "seed {seed}: {}", d.type_name);
                }
            }
        }
    }
}
