//! Decoding the hidden states of a `HiddenMarkovModel`: the jointly most probable path
//! (Viterbi), and the sequence of individually most probable states (maximum a posteriori).

use crate::model::hmm::HiddenMarkovModel;
use crate::util::{self, QuinceError, Result};
use crate::variable::Value;
use super::forward_backward;

use ndarray::Array2;

/// The most probable state path of a sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct ViterbiPath {

    /// Joint log probability of the sequence and the path
    pub log_probability: f64,

    /// State indices from `start` to `end`. On an infinite model the path stops at the state
    /// emitting the last symbol. Empty when the sequence is impossible.
    pub path: Vec<usize>,
}

/// The individually most probable emitting state at each step.
#[derive(Clone, Debug, PartialEq)]
pub struct MapPath {

    /// Sum of the log posteriors of the chosen states
    pub log_probability: f64,

    /// One emitting state index per symbol. Empty when the sequence is impossible.
    pub path: Vec<usize>,
}

/// Best predecessor of `target` at `row`, with ties going to the lowest state index
fn best(model: &HiddenMarkovModel, v: &Array2<f64>, row: usize, target: usize) -> (f64, Option<usize>) {
    let a = model.log_transition_matrix();
    let mut best = (f64::NEG_INFINITY, None);
    for &i in model.in_edges(target) {
        let score = v[[row, i]] + a[[i, target]];
        if score > best.0 {
            best = (score, Some(i));
        }
    }
    best
}

pub fn viterbi(model: &HiddenMarkovModel, sequence: &[Value]) -> Result<ViterbiPath> {
    let e = model.emission_log_probabilities(sequence)?;
    let (n, start, end) = (model.len(), model.start_index(), model.end_index());
    let last = sequence.len();

    let mut v = Array2::from_elem((last + 1, n), f64::NEG_INFINITY);
    let mut pointers: Array2<Option<usize>> = Array2::from_elem((last + 1, n), None);

    v[[0, start]] = 0.0;
    for t in 0..=last {
        if t > 0 {
            for k in 0..model.emitting() {
                let (score, from) = best(model, &v, t - 1, k);
                v[[t, k]] = score + e[[t - 1, k]];
                pointers[[t, k]] = from;
            }
        }
        for s in model.silent().chain(std::iter::once(end)) {
            let (score, from) = best(model, &v, t, s);
            v[[t, s]] = score;
            pointers[[t, s]] = from;
        }
    }

    let terminal = if model.is_infinite() {
        util::argmax((0..model.emitting()).map(|k| v[[last, k]]))
    } else {
        Some(end)
    };

    let (score, terminal) = match terminal {
        Some(s) if v[[last, s]] > f64::NEG_INFINITY => (v[[last, s]], s),
        _ => return Ok(ViterbiPath { log_probability: f64::NEG_INFINITY, path: Vec::new() }),
    };

    ///////////////////////////////////////////////////////////////////////////
    // trace back: an emitting state was entered from the previous row, a silent one from its own
    let mut path = vec![terminal];
    let (mut row, mut state) = (last, terminal);
    while !(row == 0 && state == start) {
        let from = pointers[[row, state]].ok_or(QuinceError::ImpossibleEvidence)?;
        if state < model.emitting() {
            row -= 1;
        }
        state = from;
        path.push(state);
    }
    path.reverse();

    Ok(ViterbiPath { log_probability: score, path })
}

pub fn maximum_a_posteriori(model: &HiddenMarkovModel, sequence: &[Value]) -> Result<MapPath> {
    let fb = forward_backward::forward_backward(model, sequence)?;
    if fb.log_probability == f64::NEG_INFINITY {
        return Ok(MapPath { log_probability: f64::NEG_INFINITY, path: Vec::new() });
    }

    let mut path = Vec::with_capacity(sequence.len());
    let mut log_probability = 0.0;
    for row in fb.emissions.rows() {
        let k = util::argmax(row.iter().take(model.emitting()).cloned()).ok_or(QuinceError::InvalidScope)?;
        log_probability += row[k];
        path.push(k);
    }

    Ok(MapPath { log_probability, path })
}

/// Log probability of emitting `sequence` along `path`.
///
/// # Errors
/// * `QuinceError::SchemaMismatch` if `path` does not begin at `start`, names an unknown state,
///   or visits a different number of emitting states than there are symbols
pub fn path_log_probability(model: &HiddenMarkovModel, sequence: &[Value], path: &[usize]) -> Result<f64> {
    if path.first() != Some(&model.start_index()) {
        return Err(QuinceError::SchemaMismatch(String::from("a path must begin at the start state")));
    }
    if path.iter().any(|&s| s >= model.len()) {
        return Err(QuinceError::SchemaMismatch(String::from("the path names an unknown state")));
    }
    if path.iter().filter(|&&s| s < model.emitting()).count() != sequence.len() {
        return Err(QuinceError::SchemaMismatch(
            format!("the path does not emit the {} symbols of the sequence", sequence.len())
        ));
    }

    let a = model.log_transition_matrix();
    let mut score: f64 = path.windows(2).map(|w| a[[w[0], w[1]]]).sum();

    let mut symbols = sequence.iter();
    for &s in path.iter().filter(|&&s| s < model.emitting()) {
        if let Some(symbol) = symbols.next() {
            score += model.distribution(s)?.log_probability(symbol)?;
        }
    }

    Ok(score)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::Categorical;
    use crate::model::hmm::HiddenMarkovModelBuilder;
    use crate::state::State;

    fn weather() -> HiddenMarkovModel {
        let rainy = Categorical::new(vec![("walk", 0.1), ("shop", 0.4), ("clean", 0.5)]).unwrap();
        let sunny = Categorical::new(vec![("walk", 0.6), ("shop", 0.3), ("clean", 0.1)]).unwrap();

        HiddenMarkovModelBuilder::new("weather")
            .with_state(State::new(rainy, "rainy"))
            .with_state(State::new(sunny, "sunny"))
            .with_start_transition("rainy", 0.6)
            .with_start_transition("sunny", 0.4)
            .with_transition("rainy", "rainy", 0.65)
            .with_transition("rainy", "sunny", 0.25)
            .with_transition("sunny", "rainy", 0.35)
            .with_transition("sunny", "sunny", 0.55)
            .with_end_transition("rainy", 0.1)
            .with_end_transition("sunny", 0.1)
            .bake()
            .unwrap()
    }

    fn seq(words: &[&str]) -> Vec<Value> {
        words.iter().map(|&w| Value::from(w)).collect()
    }

    #[test]
    fn most_probable_path() {
        let model = weather();
        let s = seq(&["walk", "shop", "clean"]);
        let result = model.viterbi(&s).unwrap();

        // start -> sunny -> rainy -> rainy -> end
        // .4 * .6 * .35 * .4 * .65 * .5 * .1
        let expected = (0.4f64 * 0.6 * 0.35 * 0.4 * 0.65 * 0.5 * 0.1).ln();
        assert_eq!(result.path, vec![2, 1, 0, 0, 3]);
        assert!((result.log_probability - expected).abs() < 1e-12);

        let rescored = model.path_log_probability(&s, &result.path).unwrap();
        assert!((rescored - result.log_probability).abs() < 1e-12);

        // the best path can never beat the total
        assert!(result.log_probability <= model.log_probability(&s).unwrap());
    }

    #[test]
    fn posterior_decoding() {
        let model = weather();
        let result = model.maximum_a_posteriori(&seq(&["walk", "walk", "clean"])).unwrap();
        assert_eq!(result.path.len(), 3);
        assert_eq!(result.path[0], 1);
        assert_eq!(result.path[2], 0);
        assert!(result.log_probability < 0.0);
    }

    /// Two interchangeable states, so every comparison is an exact tie
    fn mirrored() -> HiddenMarkovModel {
        let left = Categorical::new(vec![("x", 0.5), ("y", 0.5)]).unwrap();
        let right = Categorical::new(vec![("x", 0.5), ("y", 0.5)]).unwrap();

        HiddenMarkovModelBuilder::new("mirrored")
            .with_state(State::new(left, "left"))
            .with_state(State::new(right, "right"))
            .with_start_transition("left", 0.5)
            .with_start_transition("right", 0.5)
            .with_transition("left", "left", 0.4)
            .with_transition("left", "right", 0.4)
            .with_transition("right", "left", 0.4)
            .with_transition("right", "right", 0.4)
            .bake()
            .unwrap()
    }

    #[test]
    fn ties_go_to_the_lowest_index() {
        let model = mirrored();
        let s = seq(&["x", "y", "x"]);

        let best = model.viterbi(&s).unwrap();
        assert_eq!(best.path, vec![model.start_index(), 0, 0, 0, model.end_index()]);
        let expected = (0.5f64 * 0.5 * 0.4 * 0.5 * 0.4 * 0.5 * 0.2).ln();
        assert!((best.log_probability - expected).abs() < 1e-12);

        let map = model.maximum_a_posteriori(&s).unwrap();
        assert_eq!(map.path, vec![0, 0, 0]);
        assert!((map.log_probability - 3.0 * 0.5f64.ln()).abs() < 1e-9);
    }

    #[test]
    fn impossible() {
        let model = weather();
        let s = seq(&["walk", "swim"]);
        assert_eq!(model.viterbi(&s).unwrap().path, Vec::<usize>::new());
        assert!(model.maximum_a_posteriori(&s).unwrap().path.is_empty());
    }

    #[test]
    fn malformed_path() {
        let model = weather();
        let s = seq(&["walk"]);
        let (start, end) = (model.start_index(), model.end_index());
        assert!(model.path_log_probability(&s, &[1, end]).is_err());
        assert!(model.path_log_probability(&s, &[start, 0, 1, end]).is_err());
        assert!(model.path_log_probability(&s, &[start, 9]).is_err());
        assert!(model.path_log_probability(&s, &[start, 1, end]).is_ok());
    }
}
