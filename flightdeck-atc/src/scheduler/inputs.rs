//! Input candidate resolution
//!
//! Decides which version each of a job's inputs should use. The interesting
//! part is "passed" coherence: when several inputs name the same upstream job,
//! the chosen versions must have flowed through one common succeeded build of
//! that job, not merely each have passed it separately. Among feasible tuples
//! the solver prefers the newest: maximum summed `check_order`, ties broken
//! lexicographically from the first input.
//!
//! The solver is a pure function over loaded candidates so scheduling
//! decisions are unit-testable without a database.

use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// One candidate version for one input.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub versioned_resource_id: i64,
    pub check_order: i32,
    /// For each upstream job named in `passed`: the succeeded builds of that
    /// job which used this version as an input.
    pub passed_builds: HashMap<String, HashSet<Uuid>>,
}

/// One input with its ordered candidate list (most preferred first).
///
/// `latest` inputs carry their full history newest-first; `every` and
/// `pinned` inputs carry exactly the one version their strategy demands, so
/// infeasibility there skips the job rather than falling back.
#[derive(Debug, Clone)]
pub struct InputCandidates {
    pub name: String,
    pub passed: Vec<String>,
    pub candidates: Vec<Candidate>,
}

/// A resolved choice for one input.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedVersion {
    pub name: String,
    pub versioned_resource_id: i64,
    pub check_order: i32,
}

/// Find the best feasible tuple, or None when no tuple satisfies every
/// constraint.
pub fn resolve(inputs: &[InputCandidates]) -> Option<Vec<ResolvedVersion>> {
    if inputs.is_empty() {
        return Some(Vec::new());
    }

    if inputs.iter().any(|input| input.candidates.is_empty()) {
        return None;
    }

    let mut best: Option<(i64, Vec<usize>)> = None;
    let mut chosen = Vec::with_capacity(inputs.len());
    search(inputs, 0, 0, &HashMap::new(), &mut chosen, &mut best);

    let (_, picks) = best?;

    Some(
        picks
            .into_iter()
            .enumerate()
            .map(|(i, pick)| {
                let candidate = &inputs[i].candidates[pick];
                ResolvedVersion {
                    name: inputs[i].name.clone(),
                    versioned_resource_id: candidate.versioned_resource_id,
                    check_order: candidate.check_order,
                }
            })
            .collect(),
    )
}

/// Depth-first search over candidate indices. `allowed` carries, per upstream
/// job constrained so far, the builds still compatible with every choice made.
/// Candidates are visited in preference order, so the first tuple found at a
/// given sum is the lexicographically best one.
fn search(
    inputs: &[InputCandidates],
    depth: usize,
    sum: i64,
    allowed: &HashMap<String, HashSet<Uuid>>,
    chosen: &mut Vec<usize>,
    best: &mut Option<(i64, Vec<usize>)>,
) {
    if depth == inputs.len() {
        if best.as_ref().is_none_or(|(best_sum, _)| sum > *best_sum) {
            *best = Some((sum, chosen.clone()));
        }
        return;
    }

    // Upper bound: even taking every remaining input's best candidate can't
    // beat the current best.
    let remaining_max: i64 = inputs[depth..]
        .iter()
        .map(|input| {
            input
                .candidates
                .iter()
                .map(|c| c.check_order as i64)
                .max()
                .unwrap_or(0)
        })
        .sum();
    if let Some((best_sum, _)) = best {
        if sum + remaining_max <= *best_sum {
            return;
        }
    }

    let input = &inputs[depth];

    'candidates: for (idx, candidate) in input.candidates.iter().enumerate() {
        let mut narrowed = allowed.clone();

        for job in &input.passed {
            let Some(builds) = candidate.passed_builds.get(job) else {
                continue 'candidates;
            };
            if builds.is_empty() {
                continue 'candidates;
            }

            match narrowed.get_mut(job) {
                Some(existing) => {
                    existing.retain(|b| builds.contains(b));
                    if existing.is_empty() {
                        continue 'candidates;
                    }
                }
                None => {
                    narrowed.insert(job.clone(), builds.clone());
                }
            }
        }

        chosen.push(idx);
        search(
            inputs,
            depth + 1,
            sum + candidate.check_order as i64,
            &narrowed,
            chosen,
            best,
        );
        chosen.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: i64, order: i32, passed: &[(&str, &[Uuid])]) -> Candidate {
        Candidate {
            versioned_resource_id: id,
            check_order: order,
            passed_builds: passed
                .iter()
                .map(|(job, builds)| (job.to_string(), builds.iter().copied().collect()))
                .collect(),
        }
    }

    fn input(name: &str, passed: &[&str], candidates: Vec<Candidate>) -> InputCandidates {
        InputCandidates {
            name: name.to_string(),
            passed: passed.iter().map(|s| s.to_string()).collect(),
            candidates,
        }
    }

    fn ids(resolved: &[ResolvedVersion]) -> Vec<i64> {
        resolved.iter().map(|r| r.versioned_resource_id).collect()
    }

    #[test]
    fn test_unconstrained_inputs_take_their_newest() {
        let inputs = vec![
            input("r1", &[], vec![candidate(3, 3, &[]), candidate(2, 2, &[])]),
            input("r2", &[], vec![candidate(7, 1, &[])]),
        ];
        let resolved = resolve(&inputs).unwrap();
        assert_eq!(ids(&resolved), vec![3, 7]);
    }

    #[test]
    fn test_shared_passed_job_requires_one_common_build() {
        // Upstream J1 builds: #10 (v1, w1) succeeded, #11 (v2, w2) succeeded,
        // #12 (v3, w2) failed. The newest coherent tuple is (v2, w2) from
        // build #11; v3 never passed, and (v3, w2) shares no build.
        let b10 = Uuid::new_v4();
        let b11 = Uuid::new_v4();

        let inputs = vec![
            input(
                "r1",
                &["j1"],
                vec![
                    // v3 has check_order 5 but no succeeded J1 build used it.
                    candidate(103, 5, &[("j1", &[] as &[Uuid])]),
                    candidate(102, 4, &[("j1", &[b11])]),
                    candidate(101, 3, &[("j1", &[b10])]),
                ],
            ),
            input(
                "r2",
                &["j1"],
                vec![
                    candidate(202, 2, &[("j1", &[b11])]),
                    candidate(201, 1, &[("j1", &[b10])]),
                ],
            ),
        ];

        let resolved = resolve(&inputs).unwrap();
        assert_eq!(ids(&resolved), vec![102, 202]);
    }

    #[test]
    fn test_solver_backtracks_to_an_older_coherent_pair() {
        // The newest candidates of each input passed through different
        // builds; only the older pair shares one.
        let shared = Uuid::new_v4();
        let lone_a = Uuid::new_v4();
        let lone_b = Uuid::new_v4();

        let inputs = vec![
            input(
                "r1",
                &["j1"],
                vec![
                    candidate(12, 9, &[("j1", &[lone_a])]),
                    candidate(11, 8, &[("j1", &[shared])]),
                ],
            ),
            input(
                "r2",
                &["j1"],
                vec![
                    candidate(22, 9, &[("j1", &[lone_b])]),
                    candidate(21, 8, &[("j1", &[shared])]),
                ],
            ),
        ];

        let resolved = resolve(&inputs).unwrap();
        assert_eq!(ids(&resolved), vec![11, 21]);
    }

    #[test]
    fn test_no_feasible_tuple_is_none() {
        let inputs = vec![input(
            "r1",
            &["j1"],
            vec![candidate(1, 1, &[("j1", &[] as &[Uuid])])],
        )];
        assert!(resolve(&inputs).is_none());
    }

    #[test]
    fn test_input_with_no_versions_is_infeasible() {
        let inputs = vec![
            input("r1", &[], vec![candidate(1, 1, &[])]),
            input("r2", &[], vec![]),
        ];
        assert!(resolve(&inputs).is_none());
    }

    #[test]
    fn test_maximizes_total_freshness_not_first_input() {
        // Taking r1's newest forces r2 far back; the better total takes
        // r1's second-newest.
        let fresh = Uuid::new_v4();
        let stale = Uuid::new_v4();

        let inputs = vec![
            input(
                "r1",
                &["j1"],
                vec![
                    candidate(12, 10, &[("j1", &[stale])]),
                    candidate(11, 9, &[("j1", &[fresh])]),
                ],
            ),
            input(
                "r2",
                &["j1"],
                vec![
                    candidate(22, 50, &[("j1", &[fresh])]),
                    candidate(21, 1, &[("j1", &[stale])]),
                ],
            ),
        ];

        let resolved = resolve(&inputs).unwrap();
        assert_eq!(ids(&resolved), vec![11, 22]);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let shared = Uuid::new_v4();
        let inputs = vec![
            input("r1", &["j1"], vec![candidate(1, 1, &[("j1", &[shared])])]),
            input("r2", &["j1"], vec![candidate(2, 2, &[("j1", &[shared])])]),
        ];

        let first = resolve(&inputs).unwrap();
        for _ in 0..10 {
            assert_eq!(resolve(&inputs).unwrap(), first);
        }
    }

    #[test]
    fn test_empty_input_list_resolves_to_empty() {
        assert_eq!(resolve(&[]).unwrap(), Vec::new());
    }
}
