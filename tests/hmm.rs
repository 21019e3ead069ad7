use quince::estimators::TrainingConfig;
use quince::init::Initialization;
use quince::{
    Categorical, HiddenMarkovModel, HiddenMarkovModelBuilder, Normal, SharedDistribution, State,
    Value,
};

use itertools::Itertools;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn words(ws: &[&str]) -> Vec<Value> {
    ws.iter().map(|&w| Value::from(w)).collect()
}

fn dna(s: &str) -> Vec<Value> {
    s.chars().map(Value::from).collect()
}

const START: [f64; 2] = [0.6, 0.4];
const TRANSITIONS: [[f64; 2]; 2] = [[0.65, 0.25], [0.35, 0.55]];
const END: f64 = 0.1;

fn emission(state: usize, word: &str) -> f64 {
    match (state, word) {
        (0, "walk") => 0.1,
        (0, "shop") => 0.4,
        (0, "clean") => 0.5,
        (1, "walk") => 0.6,
        (1, "shop") => 0.3,
        (1, "clean") => 0.1,
        _ => 0.0,
    }
}

fn rainy_sunny() -> HiddenMarkovModel {
    let rainy = Categorical::new(vec![("walk", 0.1), ("shop", 0.4), ("clean", 0.5)]).unwrap();
    let sunny = Categorical::new(vec![("walk", 0.6), ("shop", 0.3), ("clean", 0.1)]).unwrap();

    HiddenMarkovModelBuilder::new("Rainy-Sunny")
        .with_state(State::new(rainy, "Rainy"))
        .with_state(State::new(sunny, "Sunny"))
        .with_start_transition("Rainy", START[0])
        .with_start_transition("Sunny", START[1])
        .with_transition("Rainy", "Rainy", TRANSITIONS[0][0])
        .with_transition("Rainy", "Sunny", TRANSITIONS[0][1])
        .with_transition("Sunny", "Rainy", TRANSITIONS[1][0])
        .with_transition("Sunny", "Sunny", TRANSITIONS[1][1])
        .with_end_transition("Rainy", END)
        .with_end_transition("Sunny", END)
        .bake()
        .unwrap()
}

/// Sum the probability of every hidden path explicitly
fn enumerate(seq: &[&str]) -> f64 {
    (0..seq.len())
        .map(|_| 0..2)
        .multi_cartesian_product()
        .map(|path| {
            let mut p = START[path[0]] * emission(path[0], seq[0]);
            for t in 1..seq.len() {
                p *= TRANSITIONS[path[t - 1]][path[t]] * emission(path[t], seq[t]);
            }
            p * END
        })
        .sum()
}

#[test]
fn rainy_sunny_matches_enumeration() {
    let model = rainy_sunny();

    for seq in [vec!["walk", "shop", "clean"], vec!["clean"], vec!["shop", "shop", "walk", "clean", "walk"]] {
        let expected = enumerate(&seq);
        let actual = model.log_probability(&words(&seq)).unwrap().exp();
        assert!((actual - expected).abs() < 1e-9, "{:?}: {} vs {}", seq, actual, expected);

        let f = model.forward(&words(&seq)).unwrap();
        let b = model.backward(&words(&seq)).unwrap();
        let total = f[[seq.len(), model.end_index()]];
        assert!((total - b[[0, model.start_index()]]).abs() < 1e-6);
    }
}

#[test]
fn rainy_sunny_decoding() {
    let model = rainy_sunny();
    let seq = words(&["walk", "shop", "clean"]);

    let best = model.viterbi(&seq).unwrap();
    let rescored = model.path_log_probability(&seq, &best.path).unwrap();
    assert!((best.log_probability - rescored).abs() < 1e-12);

    let names: Vec<&str> = best.path.iter().map(|&i| model.states()[i].name()).collect();
    assert_eq!(names, vec!["Rainy-Sunny-start", "Sunny", "Rainy", "Rainy", "Rainy-Sunny-end"]);

    let map = model.maximum_a_posteriori(&seq).unwrap();
    assert_eq!(map.path.len(), 3);
}

#[test]
fn rainy_sunny_training() {
    let mut model = rainy_sunny();
    let sequences = vec![
        words(&["walk", "walk", "shop", "clean", "clean"]),
        words(&["shop", "clean", "clean", "walk"]),
        words(&["walk", "walk", "walk", "shop"]),
        words(&["clean", "shop", "clean", "clean", "shop", "walk"]),
    ];

    let report = model.fit_with(&sequences, None, &TrainingConfig::default()).unwrap();
    assert!(report.improvement() > 0.0);
    for w in report.history.windows(2) {
        assert!(w[1] >= w[0] - 1e-9);
    }

    let total: f64 = sequences.iter().map(|s| model.log_probability(s).unwrap()).sum();
    assert!((total - report.final_log_probability).abs() < 1e-6);
}

#[test]
fn tied_background_states() {
    let background = SharedDistribution::new(
        Initialization::Uniform.build_categorical(vec!['A', 'C', 'G', 'T']).unwrap()
    );
    let island = Categorical::new(vec![('A', 0.1), ('C', 0.4), ('G', 0.4), ('T', 0.1)]).unwrap();
    let poly_t = Categorical::new(vec![('A', 0.1), ('C', 0.1), ('G', 0.1), ('T', 0.7)]).unwrap();

    let mut model = HiddenMarkovModelBuilder::new("Tied")
        .with_state(State::new(background.clone(), "B1"))
        .with_state(State::new(island, "CG"))
        .with_state(State::new(background, "B2"))
        .with_state(State::new(poly_t, "PT"))
        .with_start_transition("B1", 1.0)
        .with_transition("B1", "B1", 0.9)
        .with_transition("B1", "CG", 0.1)
        .with_transition("CG", "CG", 0.8)
        .with_transition("CG", "B2", 0.2)
        .with_transition("B2", "B2", 0.8)
        .with_transition("B2", "PT", 0.2)
        .with_transition("PT", "PT", 0.7)
        .with_end_transition("PT", 0.3)
        .bake()
        .unwrap();

    let sequences = vec![
        dna("TAGCACATCGCAGCGCATCACGCGCGCTAGCATATAAGCACGATCAGCACGACTGTTTTT"),
        dna("TAGAATCGCTACATAGACGCGCGCTCGCCGCGCTCGATAAGCTACGAACACGATTTTTTA"),
        dna("GATAGCTACGACTACGCGACTCACGCGCGCGCTCCGCATCAGACACGAATATAGATAAGATATTTTTT"),
    ];

    let config = TrainingConfig { stop_threshold: 0.01, ..TrainingConfig::default() };
    let report = model.fit_with(&sequences, None, &config).unwrap();
    assert!(report.improvement() > 0.0);

    let b1 = model.index_of("B1").unwrap();
    let b2 = model.index_of("B2").unwrap();
    assert!(model.states()[b1].is_tied_to(&model.states()[b2]));
    assert_eq!(model.ties().iter().filter(|g| g.len() == 2).count(), 1);

    let d = model.states()[b1].distribution().unwrap().read().as_categorical().cloned().unwrap();
    let total: f64 = d.iter().map(|(_, p)| p).sum();
    assert!((total - 1.0).abs() < 1e-9);
}

fn infinite() -> HiddenMarkovModel {
    let names = ["s1", "s2", "s3"];
    let means = [5.0, 15.0, 25.0];
    let start = [0.7, 0.2, 0.1];
    let rows = [[0.6, 0.1, 0.3], [0.4, 0.4, 0.2], [0.05, 0.15, 0.8]];

    let mut b = HiddenMarkovModelBuilder::new("infinite");
    for (name, mean) in names.iter().zip(means.iter()) {
        b = b.with_state(State::new(Normal::new(*mean, 2.0).unwrap(), name));
    }
    for (i, from) in names.iter().enumerate() {
        b = b.with_start_transition(from, start[i]);
        for (j, to) in names.iter().enumerate() {
            b = b.with_transition(from, to, rows[i][j]);
        }
    }
    b.bake().unwrap()
}

#[test]
fn infinite_model() {
    let model = infinite();
    assert!(model.is_infinite());

    let mut rng = StdRng::seed_from_u64(42);
    for n in [1, 10, 50] {
        let sample = model.sample(&mut rng, Some(n)).unwrap();
        assert_eq!(sample.emissions.len(), n);
        assert!(!sample.path.contains(&model.end_index()));
    }
    assert!(model.sample(&mut rng, None).is_err());

    let seq = model.sample(&mut rng, Some(20)).unwrap().emissions;
    let f = model.forward(&seq).unwrap();
    let b = model.backward(&seq).unwrap();
    let total = model.log_probability(&seq).unwrap();
    assert!(total.is_finite());
    assert!((total - b[[0, model.start_index()]]).abs() < 1e-6);
    assert_eq!(f[[seq.len(), model.end_index()]], f64::NEG_INFINITY);

    // the total sums the emitting states of the last row instead
    let last: Vec<f64> = (0..model.emitting()).map(|k| f[[seq.len(), k]]).collect();
    assert!((total - quince::util::log_sum_exp(&last)).abs() < 1e-9);

    let best = model.viterbi(&seq).unwrap();
    assert_eq!(best.path.len(), seq.len() + 1);
    assert!(*best.path.last().unwrap() < model.emitting());
}

#[test]
fn infinite_training() {
    let mut model = infinite();
    let mut rng = StdRng::seed_from_u64(9);
    let sequences: Vec<Vec<Value>> = (0..5)
        .map(|_| model.sample(&mut rng, Some(30)).unwrap().emissions)
        .collect();

    let config = TrainingConfig { max_iterations: 25, ..TrainingConfig::default() };
    let report = model.fit_with(&sequences, None, &config).unwrap();
    assert!(report.iterations <= 25);
    for w in report.history.windows(2) {
        assert!(w[1] >= w[0] - 1e-6);
    }
    assert!(model.is_infinite());
}
