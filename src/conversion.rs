use std::collections::{HashMap, HashSet, VecDeque};

use sqlx::SqlitePool;

use crate::error::{CoreError, CoreResult};

/// One conversion edge. `modifier` is the number of `from_unit`s that make
/// one `to_unit` (3 teaspoons per tablespoon), so applying an edge divides
/// the quantity. Edges tagged with an ingredient are only traversable when
/// converting that ingredient.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ConversionEdge {
    pub id: String,
    pub from_unit: String,
    pub to_unit: String,
    pub only_for_ingredient: Option<String>,
    pub modifier: f64,
}

/// Directed multigraph over measurement units, pure over the rows it was
/// loaded from. Resolution never touches the store.
#[derive(Debug, Clone, Default)]
pub struct ConversionGraph {
    universal_units: HashSet<String>,
    edges_by_source: HashMap<String, Vec<ConversionEdge>>,
}

#[derive(Debug, Clone)]
struct CandidatePath {
    edges: Vec<ConversionEdge>,
}

impl CandidatePath {
    fn universal_edge_count(&self) -> usize {
        self.edges
            .iter()
            .filter(|e| e.only_for_ingredient.is_none())
            .count()
    }

    fn modifier_product(&self) -> f64 {
        self.edges.iter().map(|e| e.modifier).product()
    }

    fn id_sequence(&self) -> Vec<&str> {
        self.edges.iter().map(|e| e.id.as_str()).collect()
    }
}

impl ConversionGraph {
    pub fn new(
        universal_units: impl IntoIterator<Item = String>,
        edges: impl IntoIterator<Item = ConversionEdge>,
    ) -> Self {
        let mut edges_by_source: HashMap<String, Vec<ConversionEdge>> = HashMap::new();
        for edge in edges {
            edges_by_source
                .entry(edge.from_unit.clone())
                .or_default()
                .push(edge);
        }
        ConversionGraph {
            universal_units: universal_units.into_iter().collect(),
            edges_by_source,
        }
    }

    /// Load live units and conversion edges from the store.
    pub async fn load(pool: &SqlitePool) -> CoreResult<Self> {
        let universal: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM valid_measurement_units \
             WHERE universal = 1 AND archived_at IS NULL",
        )
        .fetch_all(pool)
        .await?;

        let edges: Vec<ConversionEdge> = sqlx::query_as(
            "SELECT id, from_unit, to_unit, only_for_ingredient, modifier \
             FROM valid_measurement_unit_conversions \
             WHERE archived_at IS NULL \
             ORDER BY id",
        )
        .fetch_all(pool)
        .await?;

        Ok(ConversionGraph::new(universal, edges))
    }

    /// Convert `qty` of `ingredient` (when given) from one unit to another.
    pub fn convert(
        &self,
        qty: f64,
        from: &str,
        to: &str,
        ingredient: Option<&str>,
    ) -> CoreResult<f64> {
        if from == to {
            return Ok(qty);
        }

        if let Some(path) = self.best_path(from, to, ingredient) {
            return Ok(qty / path.modifier_product());
        }

        // A universal unit (grams and friends) converts to and from
        // anything with a modifier of 1.
        if self.universal_units.contains(from) || self.universal_units.contains(to) {
            return Ok(qty);
        }

        Err(CoreError::NoConversion {
            from: from.to_string(),
            to: to.to_string(),
        })
    }

    /// Edges traversable out of `unit` for this ingredient, reduced per
    /// destination: ingredient-specific edges shadow universal ones.
    fn traversable(&self, unit: &str, ingredient: Option<&str>) -> Vec<&ConversionEdge> {
        let Some(all) = self.edges_by_source.get(unit) else {
            return Vec::new();
        };

        let mut specific_destinations: HashSet<&str> = HashSet::new();
        if let Some(ing) = ingredient {
            for edge in all {
                if edge.only_for_ingredient.as_deref() == Some(ing) {
                    specific_destinations.insert(edge.to_unit.as_str());
                }
            }
        }

        all.iter()
            .filter(|edge| match (&edge.only_for_ingredient, ingredient) {
                (None, _) => !specific_destinations.contains(edge.to_unit.as_str()),
                (Some(tag), Some(ing)) => tag == ing,
                (Some(_), None) => false,
            })
            .collect()
    }

    /// Breadth-first search for the shortest path, then the §tie-break among
    /// equally short ones: most ingredient-specific edges, then smallest
    /// modifier product, then lexicographically smallest edge-ID sequence.
    fn best_path(&self, from: &str, to: &str, ingredient: Option<&str>) -> Option<CandidatePath> {
        let min_depth = self.shortest_depth(from, to, ingredient)?;

        let mut best: Option<CandidatePath> = None;
        let mut stack: Vec<ConversionEdge> = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(from.to_string());
        self.enumerate_paths(
            from,
            to,
            ingredient,
            min_depth,
            &mut stack,
            &mut visited,
            &mut best,
        );
        best
    }

    fn shortest_depth(&self, from: &str, to: &str, ingredient: Option<&str>) -> Option<usize> {
        let mut depths: HashMap<&str, usize> = HashMap::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        depths.insert(from, 0);
        queue.push_back(from);

        while let Some(unit) = queue.pop_front() {
            let depth = depths[unit];
            for edge in self.traversable(unit, ingredient) {
                if edge.to_unit == to {
                    return Some(depth + 1);
                }
                if !depths.contains_key(edge.to_unit.as_str()) {
                    depths.insert(edge.to_unit.as_str(), depth + 1);
                    queue.push_back(edge.to_unit.as_str());
                }
            }
        }
        None
    }

    #[allow(clippy::too_many_arguments)]
    fn enumerate_paths(
        &self,
        current: &str,
        to: &str,
        ingredient: Option<&str>,
        remaining: usize,
        stack: &mut Vec<ConversionEdge>,
        visited: &mut HashSet<String>,
        best: &mut Option<CandidatePath>,
    ) {
        if remaining == 0 {
            return;
        }
        for edge in self.traversable(current, ingredient) {
            if edge.to_unit == to {
                stack.push(edge.clone());
                let candidate = CandidatePath {
                    edges: stack.clone(),
                };
                if prefer(&candidate, best.as_ref()) {
                    *best = Some(candidate);
                }
                stack.pop();
                continue;
            }
            if remaining > 1 && !visited.contains(edge.to_unit.as_str()) {
                visited.insert(edge.to_unit.clone());
                stack.push(edge.clone());
                self.enumerate_paths(
                    &edge.to_unit,
                    to,
                    ingredient,
                    remaining - 1,
                    stack,
                    visited,
                    best,
                );
                stack.pop();
                visited.remove(edge.to_unit.as_str());
            }
        }
    }
}

fn prefer(candidate: &CandidatePath, incumbent: Option<&CandidatePath>) -> bool {
    let Some(incumbent) = incumbent else {
        return true;
    };
    // Fewer universal edges means more ingredient-specific ones.
    let by_specificity = candidate
        .universal_edge_count()
        .cmp(&incumbent.universal_edge_count());
    if by_specificity != std::cmp::Ordering::Equal {
        return by_specificity == std::cmp::Ordering::Less;
    }
    let by_product = candidate
        .modifier_product()
        .partial_cmp(&incumbent.modifier_product())
        .unwrap_or(std::cmp::Ordering::Equal);
    if by_product != std::cmp::Ordering::Equal {
        return by_product == std::cmp::Ordering::Less;
    }
    candidate.id_sequence() < incumbent.id_sequence()
}
