//! Error matrix accuracy assessment over withheld validation objects.

use std::collections::BTreeMap;

use serde::Serialize;

/// Counts indexed `[reference][predicted]` over a fixed class list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorMatrix {
    pub classes: Vec<u16>,
    pub counts: Vec<Vec<u64>>,
    /// Pairs naming a class outside `classes`.
    pub skipped: u64,
}

impl ErrorMatrix {
    pub fn new(classes: Vec<u16>) -> Self {
        let n = classes.len();
        Self { classes, counts: vec![vec![0; n]; n], skipped: 0 }
    }

    fn index(&self, class: u16) -> Option<usize> {
        self.classes.iter().position(|&c| c == class)
    }

    pub fn record(&mut self, reference: u16, predicted: u16) {
        match (self.index(reference), self.index(predicted)) {
            (Some(r), Some(p)) => self.counts[r][p] += 1,
            _ => self.skipped += 1,
        }
    }

    /// Matrix over objects present in both maps.
    pub fn from_labels(classes: Vec<u16>, reference: &BTreeMap<u32, u16>, predicted: &BTreeMap<u32, u16>) -> Self {
        let mut m = Self::new(classes);
        for (id, &truth) in reference {
            if let Some(&guess) = predicted.get(id) {
                m.record(truth, guess);
            }
        }
        m
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }

    fn row_sum(&self, i: usize) -> u64 {
        self.counts[i].iter().sum()
    }

    fn col_sum(&self, j: usize) -> u64 {
        self.counts.iter().map(|row| row[j]).sum()
    }

    pub fn overall_accuracy(&self) -> Option<f64> {
        let total = self.total();
        if total == 0 {
            return None;
        }
        let diag: u64 = (0..self.classes.len()).map(|i| self.counts[i][i]).sum();
        Some(diag as f64 / total as f64)
    }

    /// Per reference class: correct / reference total. `None` for empty rows.
    pub fn producers_accuracy(&self) -> Vec<Option<f64>> {
        (0..self.classes.len())
            .map(|i| {
                let n = self.row_sum(i);
                (n > 0).then(|| self.counts[i][i] as f64 / n as f64)
            })
            .collect()
    }

    /// Per predicted class: correct / predicted total. `None` for empty columns.
    pub fn consumers_accuracy(&self) -> Vec<Option<f64>> {
        (0..self.classes.len())
            .map(|j| {
                let n = self.col_sum(j);
                (n > 0).then(|| self.counts[j][j] as f64 / n as f64)
            })
            .collect()
    }

    /// Cohen's kappa. `None` when empty or when chance agreement is total.
    pub fn kappa(&self) -> Option<f64> {
        let total = self.total() as f64;
        let po = self.overall_accuracy()?;
        let pe: f64 = (0..self.classes.len())
            .map(|i| self.row_sum(i) as f64 * self.col_sum(i) as f64)
            .sum::<f64>()
            / (total * total);
        if pe >= 1.0 {
            return None;
        }
        Some((po - pe) / (1.0 - pe))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn known() -> ErrorMatrix {
        let mut m = ErrorMatrix::new(vec![1, 2]);
        m.counts = vec![vec![50, 3], vec![7, 40]];
        m
    }

    #[test]
    fn figures_on_a_known_matrix() {
        let m = known();
        assert_eq!(m.total(), 100);
        assert_relative_eq!(m.overall_accuracy().unwrap(), 0.9);

        let pa = m.producers_accuracy();
        assert_relative_eq!(pa[0].unwrap(), 50.0 / 53.0);
        assert_relative_eq!(pa[1].unwrap(), 40.0 / 47.0);
        let ua = m.consumers_accuracy();
        assert_relative_eq!(ua[0].unwrap(), 50.0 / 57.0);
        assert_relative_eq!(ua[1].unwrap(), 40.0 / 43.0);

        // pe = (53·57 + 47·43) / 100² = 0.5042
        assert_relative_eq!(m.kappa().unwrap(), (0.9 - 0.5042) / (1.0 - 0.5042), epsilon = 1e-12);
    }

    #[test]
    fn from_labels_joins_on_object_id() {
        let reference = BTreeMap::from([(1, 1), (2, 2), (3, 2), (4, 7)]);
        let predicted = BTreeMap::from([(1, 1), (2, 1), (3, 2), (4, 2), (5, 1)]);
        let m = ErrorMatrix::from_labels(vec![1, 2], &reference, &predicted);
        assert_eq!(m.counts, vec![vec![1, 0], vec![1, 1]]);
        assert_eq!(m.skipped, 1);
    }

    #[test]
    fn empty_matrix_has_no_figures() {
        let m = ErrorMatrix::new(vec![1, 2, 3]);
        assert_eq!(m.overall_accuracy(), None);
        assert_eq!(m.kappa(), None);
        assert_eq!(m.producers_accuracy(), vec![None, None, None]);
    }
}
