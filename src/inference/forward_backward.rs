//! The forward and backward dynamic programs over a `HiddenMarkovModel`, in log space.
//!
//! Both matrices have `T + 1` rows and one column per state. Row `t` of the forward matrix holds
//! the log probability of emitting the first `t` symbols and standing in each state; row 0 only
//! reaches `start` and the silent states below it. Silent states take their mass from the same
//! row, in topological order, so the forward pass visits them after the emitting states of a row
//! and the backward pass visits them first.

use crate::model::hmm::HiddenMarkovModel;
use crate::util::{self, Result};
use crate::variable::Value;

use ndarray::Array2;

/// Expected transition counts and emission posteriors of one sequence.
#[derive(Clone, Debug)]
pub struct ForwardBackward {

    /// ```transitions[[i, j]]``` is the expected number of uses of the edge ```i -> j```
    pub transitions: Array2<f64>,

    /// ```emissions[[t, k]]``` is the log posterior of state `k` emitting symbol `t`. Silent
    /// states hold `NEG_INFINITY`.
    pub emissions: Array2<f64>,

    /// Total log likelihood of the sequence
    pub log_probability: f64,
}

/// Log probability of reaching `target` at `row`, where `row` may still be filling in
fn incoming(model: &HiddenMarkovModel, m: &Array2<f64>, row: usize, target: usize, emission: f64) -> f64 {
    let a = model.log_transition_matrix();
    let terms: Vec<f64> = model.in_edges(target)
                               .iter()
                               .map(|&i| m[[row, i]] + a[[i, target]])
                               .collect();
    util::log_sum_exp(&terms) + emission
}

pub fn forward(model: &HiddenMarkovModel, sequence: &[Value]) -> Result<Array2<f64>> {
    let e = model.emission_log_probabilities(sequence)?;
    let (n, start, end) = (model.len(), model.start_index(), model.end_index());
    let mut f = Array2::from_elem((sequence.len() + 1, n), f64::NEG_INFINITY);

    f[[0, start]] = 0.0;
    for t in 0..=sequence.len() {
        if t > 0 {
            for k in 0..model.emitting() {
                f[[t, k]] = incoming(model, &f, t - 1, k, e[[t - 1, k]]);
            }
        }
        for s in model.silent() {
            f[[t, s]] = incoming(model, &f, t, s, 0.0);
        }
        f[[t, end]] = incoming(model, &f, t, end, 0.0);
    }

    Ok(f)
}

pub fn backward(model: &HiddenMarkovModel, sequence: &[Value]) -> Result<Array2<f64>> {
    let e = model.emission_log_probabilities(sequence)?;
    let a = model.log_transition_matrix();
    let (n, start, end) = (model.len(), model.start_index(), model.end_index());
    let last = sequence.len();
    let mut b = Array2::from_elem((last + 1, n), f64::NEG_INFINITY);

    for t in (0..=last).rev() {
        if t == last && model.is_infinite() {
            // an infinite model may stop in any emitting state
            for k in 0..model.emitting() {
                b[[t, k]] = 0.0;
            }
            continue;
        }
        if t == last {
            b[[t, end]] = 0.0;
        }

        let outgoing = |b: &Array2<f64>, source: usize| {
            let terms: Vec<f64> = model.out_edges(source)
                                       .iter()
                                       .map(|&j| {
                                           if j < model.emitting() {
                                               if t == last {
                                                   f64::NEG_INFINITY
                                               } else {
                                                   a[[source, j]] + e[[t, j]] + b[[t + 1, j]]
                                               }
                                           } else {
                                               a[[source, j]] + b[[t, j]]
                                           }
                                       })
                                       .collect();
            util::log_sum_exp(&terms)
        };

        for s in model.silent().rev() {
            b[[t, s]] = outgoing(&b, s);
        }
        b[[t, start]] = outgoing(&b, start);
        for k in 0..model.emitting() {
            b[[t, k]] = outgoing(&b, k);
        }
    }

    Ok(b)
}

/// The total log likelihood held by a forward matrix over `len` symbols
pub fn total(model: &HiddenMarkovModel, f: &Array2<f64>, len: usize) -> f64 {
    if model.is_infinite() {
        let terms: Vec<f64> = (0..model.emitting()).map(|k| f[[len, k]]).collect();
        util::log_sum_exp(&terms)
    } else {
        f[[len, model.end_index()]]
    }
}

/// Run both passes and combine them into expected counts.
///
/// A sequence with zero probability yields zero counts, `NEG_INFINITY` posteriors and a
/// `NEG_INFINITY` log likelihood.
pub fn forward_backward(model: &HiddenMarkovModel, sequence: &[Value]) -> Result<ForwardBackward> {
    let n = model.len();
    let len = sequence.len();
    let f = forward(model, sequence)?;
    let b = backward(model, sequence)?;
    let log_p = total(model, &f, len);

    let mut transitions = Array2::zeros((n, n));
    let mut emissions = Array2::from_elem((len, n), f64::NEG_INFINITY);
    if log_p == f64::NEG_INFINITY {
        return Ok(ForwardBackward { transitions, emissions, log_probability: log_p });
    }

    let e = model.emission_log_probabilities(sequence)?;
    let a = model.log_transition_matrix();

    for i in 0..n {
        for &j in model.out_edges(i) {
            let mut count = 0.0;
            if j < model.emitting() {
                for t in 0..len {
                    count += (f[[t, i]] + a[[i, j]] + e[[t, j]] + b[[t + 1, j]] - log_p).exp();
                }
            } else {
                for t in 0..=len {
                    count += (f[[t, i]] + a[[i, j]] + b[[t, j]] - log_p).exp();
                }
            }
            transitions[[i, j]] = count;
        }
    }

    for t in 0..len {
        for k in 0..model.emitting() {
            emissions[[t, k]] = f[[t + 1, k]] + b[[t + 1, k]] - log_p;
        }
    }

    Ok(ForwardBackward { transitions, emissions, log_probability: log_p })
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::Categorical;
    use crate::model::hmm::HiddenMarkovModelBuilder;
    use crate::state::State;

    /// Two fair and loaded dice with a silent switch between them
    fn casino() -> HiddenMarkovModel {
        let fair = Categorical::uniform(vec![1, 2, 3]).unwrap();
        let loaded = Categorical::new(vec![(1, 0.1), (2, 0.1), (3, 0.8)]).unwrap();

        HiddenMarkovModelBuilder::new("casino")
            .with_state(State::new(fair, "fair"))
            .with_state(State::new(loaded, "loaded"))
            .with_state(State::silent("switch"))
            .with_start_transition("fair", 0.5)
            .with_start_transition("switch", 0.5)
            .with_transition("fair", "fair", 0.6)
            .with_transition("fair", "switch", 0.3)
            .with_transition("switch", "loaded", 1.0)
            .with_transition("loaded", "loaded", 0.7)
            .with_transition("loaded", "fair", 0.2)
            .bake()
            .unwrap()
    }

    fn rolls(values: &[i64]) -> Vec<Value> {
        values.iter().map(|&v| Value::from(v)).collect()
    }

    #[test]
    fn totals_agree() {
        let model = casino();
        for seq in [rolls(&[3]), rolls(&[1, 3, 3, 2]), rolls(&[3, 3, 3, 3, 3, 1])] {
            let f = model.forward(&seq).unwrap();
            let b = model.backward(&seq).unwrap();
            let total = total(&model, &f, seq.len());
            assert!((total - b[[0, model.start_index()]]).abs() < 1e-10);
        }
    }

    #[test]
    fn single_symbol_by_hand() {
        let model = casino();

        // start -> fair -> end, or start -> switch -> loaded -> end
        let expected: f64 = 0.5 * (1.0 / 3.0) * 0.1 + 0.5 * 0.8 * 0.1;
        let actual = model.log_probability(&rolls(&[3])).unwrap();
        assert!((actual - expected.ln()).abs() < 1e-12);
    }

    #[test]
    fn posteriors() {
        let model = casino();
        let seq = rolls(&[1, 3, 3, 2]);
        let fb = model.forward_backward(&seq).unwrap();

        for t in 0..seq.len() {
            let p: f64 = fb.emissions.row(t).iter().map(|v| v.exp()).sum();
            assert!((p - 1.0).abs() < 1e-9);
        }

        // every symbol is emitted by exactly one transition into an emitting state
        let into_emitting: f64 = (0..model.len())
            .map(|i| (0..model.emitting()).map(|k| fb.transitions[[i, k]]).sum::<f64>())
            .sum();
        assert!((into_emitting - seq.len() as f64).abs() < 1e-9);

        // and the chain enters end exactly once
        let into_end: f64 = fb.transitions.column(model.end_index()).sum();
        assert!((into_end - 1.0).abs() < 1e-9);
    }

    #[test]
    fn impossible_sequence() {
        let model = casino();
        let fb = model.forward_backward(&rolls(&[4])).unwrap();
        assert_eq!(fb.log_probability, f64::NEG_INFINITY);
        assert_eq!(fb.transitions.sum(), 0.0);
    }
}
