/// Progress of one operation: a fraction in `[0.0, 1.0]` plus a status line.
///
/// Idle operations sit at 1.0. Within one run the fraction only grows: `begin`
/// is the single place it may go back down.
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    fraction: f64,
    text: String,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            fraction: 1.0,
            text: String::new(),
        }
    }
}

impl Progress {
    pub fn fraction(&self) -> f64 {
        self.fraction
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_complete(&self) -> bool {
        self.fraction >= 1.0
    }

    /// Starts a new run at `fraction`.
    pub fn begin(&mut self, fraction: f64, text: impl Into<String>) {
        self.fraction = clamp(fraction);
        self.text = text.into();
    }

    /// Moves forward to `fraction`; smaller values are ignored.
    /// Returns the fraction now in effect.
    pub fn advance(&mut self, fraction: f64) -> f64 {
        let fraction = clamp(fraction);
        if fraction > self.fraction {
            self.fraction = fraction;
        }
        self.fraction
    }

    pub fn advance_with_text(&mut self, fraction: f64, text: impl Into<String>) -> f64 {
        self.text = text.into();
        self.advance(fraction)
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn finish(&mut self) {
        self.fraction = 1.0;
    }
}

fn clamp(fraction: f64) -> f64 {
    if fraction.is_nan() {
        0.0
    } else {
        fraction.clamp(0.0, 1.0)
    }
}
