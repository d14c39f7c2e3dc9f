//! Precision / recall evaluation of detected events against annotations.

use std::fmt;

/// Default tolerance for matching a detection to an annotation, in seconds
pub const DEFAULT_WINDOW: f64 = 0.07;

/// Counts of true/false positive/negative detections.
///
/// Each ratio is 0 when its numerator is 0.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SimpleEvaluation {
    pub tp: usize,
    pub fp: usize,
    pub tn: usize,
    pub fn_: usize,
    /// Signed deviations `detection - annotation` of the true positives
    pub errors: Vec<f64>,
}

impl SimpleEvaluation {
    pub fn precision(&self) -> f64 {
        if self.tp == 0 {
            return 0.0;
        }
        self.tp as f64 / (self.tp + self.fp) as f64
    }

    pub fn recall(&self) -> f64 {
        if self.tp == 0 {
            return 0.0;
        }
        self.tp as f64 / (self.tp + self.fn_) as f64
    }

    pub fn fmeasure(&self) -> f64 {
        let numerator = 2.0 * self.precision() * self.recall();
        if numerator == 0.0 {
            return 0.0;
        }
        numerator / (self.precision() + self.recall())
    }

    pub fn accuracy(&self) -> f64 {
        let numerator = self.tp + self.tn;
        if numerator == 0 {
            return 0.0;
        }
        numerator as f64 / (self.tp + self.fp + self.tn + self.fn_) as f64
    }

    pub fn mean_error(&self) -> f64 {
        if self.errors.is_empty() {
            return 0.0;
        }
        self.errors.iter().sum::<f64>() / self.errors.len() as f64
    }

    pub fn std_error(&self) -> f64 {
        if self.errors.is_empty() {
            return 0.0;
        }
        let mean = self.mean_error();
        let variance = self.errors.iter().map(|e| (e - mean).powi(2)).sum::<f64>()
            / self.errors.len() as f64;
        variance.sqrt()
    }

    /// Add the counts of another evaluation, e.g. to sum over files.
    pub fn merge(&mut self, other: &SimpleEvaluation) {
        self.tp += other.tp;
        self.fp += other.fp;
        self.tn += other.tn;
        self.fn_ += other.fn_;
        self.errors.extend_from_slice(&other.errors);
    }
}

/// Write the two summary lines shared by single and averaged evaluations.
fn write_summary(
    f: &mut fmt::Formatter<'_>,
    (tp, fp, fn_): (f64, f64, f64),
    precision: f64,
    recall: f64,
    fmeasure: f64,
    accuracy: f64,
    (mean, std): (f64, f64),
) -> fmt::Result {
    write!(
        f,
        "  targets: {:5.0} correct: {:5.0} fp: {:4.0} fn: {:4.0}",
        tp + fn_,
        tp,
        fp,
        fn_,
    )?;
    writeln!(f, " p={precision:.3} r={recall:.3} f={fmeasure:.3}")?;
    write!(
        f,
        "  tpr: {:.1}% fpr: {:.1}% acc: {:.1}% mean: {:.1} ms std: {:.1} ms",
        recall * 100.0,
        (1.0 - precision) * 100.0,
        accuracy * 100.0,
        mean * 1000.0,
        std * 1000.0
    )
}

impl fmt::Display for SimpleEvaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_summary(
            f,
            (self.tp as f64, self.fp as f64, self.fn_ as f64),
            self.precision(),
            self.recall(),
            self.fmeasure(),
            self.accuracy(),
            (self.mean_error(), self.std_error()),
        )
    }
}

/// Averages the scores of several evaluations, one per file.
///
/// Counts and ratios are means of the per-file values, so every file weighs
/// the same regardless of its number of events.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeanEvaluation {
    evaluations: Vec<SimpleEvaluation>,
}

impl MeanEvaluation {
    pub fn push(&mut self, evaluation: SimpleEvaluation) {
        self.evaluations.push(evaluation);
    }

    pub fn len(&self) -> usize {
        self.evaluations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evaluations.is_empty()
    }

    /// Mean of `score` over all evaluations, 0 when there are none.
    fn mean(&self, score: impl Fn(&SimpleEvaluation) -> f64) -> f64 {
        if self.evaluations.is_empty() {
            return 0.0;
        }
        self.evaluations.iter().map(score).sum::<f64>() / self.evaluations.len() as f64
    }

    pub fn precision(&self) -> f64 {
        self.mean(SimpleEvaluation::precision)
    }

    pub fn recall(&self) -> f64 {
        self.mean(SimpleEvaluation::recall)
    }

    pub fn fmeasure(&self) -> f64 {
        self.mean(SimpleEvaluation::fmeasure)
    }

    pub fn accuracy(&self) -> f64 {
        self.mean(SimpleEvaluation::accuracy)
    }

    pub fn mean_error(&self) -> f64 {
        self.mean(SimpleEvaluation::mean_error)
    }

    pub fn std_error(&self) -> f64 {
        self.mean(SimpleEvaluation::std_error)
    }
}

impl fmt::Display for MeanEvaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_summary(
            f,
            (
                self.mean(|e| e.tp as f64),
                self.mean(|e| e.fp as f64),
                self.mean(|e| e.fn_ as f64),
            ),
            self.precision(),
            self.recall(),
            self.fmeasure(),
            self.accuracy(),
            (self.mean_error(), self.std_error()),
        )
    }
}

/// Match detections to annotations one-to-one within `window` seconds.
///
/// Both lists are sorted first; matching walks them in order and pairs the
/// earliest unmatched detection and annotation that lie within the window.
pub fn evaluate_events(
    detections: &[f64],
    annotations: &[f64],
    window: f64,
) -> SimpleEvaluation {
    let mut detections = detections.to_vec();
    let mut annotations = annotations.to_vec();
    detections.sort_by(f64::total_cmp);
    annotations.sort_by(f64::total_cmp);

    let mut evaluation = SimpleEvaluation::default();
    let (mut i, mut j) = (0, 0);

    while i < detections.len() && j < annotations.len() {
        let deviation = detections[i] - annotations[j];
        if deviation.abs() <= window {
            evaluation.tp += 1;
            evaluation.errors.push(deviation);
            i += 1;
            j += 1;
        } else if deviation < 0.0 {
            evaluation.fp += 1;
            i += 1;
        } else {
            evaluation.fn_ += 1;
            j += 1;
        }
    }

    evaluation.fp += detections.len() - i;
    evaluation.fn_ += annotations.len() - j;

    evaluation
}
