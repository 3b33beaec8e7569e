//! # Living Equation
//!
//! A five-dimensional nonlinear dynamical system over relationship state:
//!
//! ```text
//! dx/dt = f(x, c, t) - λ·x     (phase exempt from decay)
//! ```
//!
//! with `x = (connection, resonance, growth, trust, phase)`. The first
//! four components live in [0, 1]; phase is an angle reduced mod 2π. `f`
//! couples the components pairwise through a fixed 4×4 interaction
//! matrix and injects conversational context: emotional correlation
//! between the speakers drives resonance, valence alignment drives
//! connection, arousal synchrony drives resonance.
//!
//! The equation's time unit is **hours**: λ = 0.1 means a tenth of the
//! state relaxes away per hour of silence, which matches how these
//! relationship traces behave over real conversation gaps.
//!
//! Integration is an adaptive embedded Runge–Kutta 4(5) (Dormand–Prince
//! coefficients) with relative tolerance 1e-6. Boundaries clip the
//! derivative to zero rather than reflecting.

use serde::{Deserialize, Serialize};

use crate::affect::Affect;
use crate::config::LivingEquationConfig;
use crate::error::{EngineError, Result};
use crate::message::Speaker;

const TAU: f64 = std::f64::consts::TAU;

/// Relative integration tolerance.
const RTOL: f64 = 1e-6;

/// Hard cap on accepted + rejected integrator steps per evolve call.
const MAX_STEPS: usize = 20_000;

// ============================================================================
// STATE
// ============================================================================

/// The relationship state vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelationshipState {
    pub connection: f64,
    pub resonance: f64,
    pub growth: f64,
    pub trust: f64,
    /// Angle in [0, 2π).
    pub phase: f64,
}

impl Default for RelationshipState {
    fn default() -> Self {
        Self {
            connection: 0.5,
            resonance: 0.5,
            growth: 0.1,
            trust: 0.5,
            phase: 0.0,
        }
    }
}

impl RelationshipState {
    pub fn to_vector(self) -> [f64; 5] {
        [
            self.connection,
            self.resonance,
            self.growth,
            self.trust,
            self.phase,
        ]
    }

    pub fn from_vector(v: [f64; 5]) -> Self {
        Self {
            connection: v[0].clamp(0.0, 1.0),
            resonance: v[1].clamp(0.0, 1.0),
            growth: v[2].clamp(0.0, 1.0),
            trust: v[3].clamp(0.0, 1.0),
            phase: v[4].rem_euclid(TAU),
        }
    }

    /// Euclidean distance over the bounded components, phase excluded.
    pub fn distance(&self, other: &RelationshipState) -> f64 {
        ((self.connection - other.connection).powi(2)
            + (self.resonance - other.resonance).powi(2)
            + (self.growth - other.growth).powi(2)
            + (self.trust - other.trust).powi(2))
        .sqrt()
    }

    pub fn is_valid(&self) -> bool {
        let bounded = |v: f64| (0.0..=1.0).contains(&v);
        bounded(self.connection)
            && bounded(self.resonance)
            && bounded(self.growth)
            && bounded(self.trust)
            && (0.0..TAU).contains(&self.phase)
    }
}

// ============================================================================
// CONTEXT
// ============================================================================

/// Conversational context injected into `f` between events.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EquationContext {
    /// PAD-vector correlation between speakers, [-1, 1].
    pub emotional_correlation: f64,
    /// Valence agreement between speakers, [0, 1].
    pub valence_alignment: f64,
    /// Arousal agreement between speakers, [0, 1].
    pub arousal_synchrony: f64,
}

impl EquationContext {
    /// Derive context from a per-speaker affect decomposition. Returns
    /// `None` unless both dialogue voices are present.
    pub fn from_affect(affect: &Affect) -> Option<Self> {
        let user = affect.for_speaker(Speaker::User)?;
        let assistant = affect.for_speaker(Speaker::Assistant)?;

        let dot = user.pad.pleasure * assistant.pad.pleasure
            + user.pad.arousal * assistant.pad.arousal
            + user.pad.dominance * assistant.pad.dominance;
        let norm_u = (user.pad.pleasure.powi(2)
            + user.pad.arousal.powi(2)
            + user.pad.dominance.powi(2))
        .sqrt();
        let norm_a = (assistant.pad.pleasure.powi(2)
            + assistant.pad.arousal.powi(2)
            + assistant.pad.dominance.powi(2))
        .sqrt();
        let emotional_correlation = if norm_u > 1e-9 && norm_a > 1e-9 {
            (dot / (norm_u * norm_a)).clamp(-1.0, 1.0)
        } else {
            0.0
        };

        let valence_alignment =
            1.0 - ((user.pad.pleasure - assistant.pad.pleasure).abs() / 2.0).clamp(0.0, 1.0);
        let arousal_synchrony =
            1.0 - ((user.pad.arousal - assistant.pad.arousal).abs() / 2.0).clamp(0.0, 1.0);

        Some(Self {
            emotional_correlation,
            valence_alignment,
            arousal_synchrony,
        })
    }
}

// ============================================================================
// EVENTS
// ============================================================================

/// Discrete interaction events with fixed delta tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PositiveInteraction,
    CollaborativeWork,
    Conflict,
    Support,
    Separation,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PositiveInteraction => "positive_interaction",
            EventKind::CollaborativeWork => "collaborative_work",
            EventKind::Conflict => "conflict",
            EventKind::Support => "support",
            EventKind::Separation => "separation",
        }
    }
}

/// Stability forecast over a time horizon (no external context).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StabilityForecast {
    /// (1 - drift) · avg_connection · (1 - connection_variance), in [0, 1].
    pub stability_score: f64,
    pub drift: f64,
    pub average_connection: f64,
    pub minimum_connection: f64,
    /// Population variance of connection across the sampled trajectory.
    /// An oscillating bond is not a stable one, whatever its average.
    pub connection_variance: f64,
}

// ============================================================================
// EVOLVER
// ============================================================================

/// The living-equation evolver. Stateless besides its coefficients; the
/// memory task owns the [`RelationshipState`] it advances.
#[derive(Debug, Clone)]
pub struct LivingEquation {
    config: LivingEquationConfig,
}

impl LivingEquation {
    pub fn new(config: LivingEquationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LivingEquationConfig {
        &self.config
    }

    /// `dx/dt = f(x, c, t) - λ·x`, with boundary clipping.
    fn derivative(&self, x: &[f64; 5], context: Option<&EquationContext>) -> [f64; 5] {
        let [connection, resonance, growth, trust, phase] = *x;
        let cfg = &self.config;
        let mut f = [0.0_f64; 5];

        // Connection: grows with resonance and trust, enhanced by phase
        // alignment; valence alignment gates the coupling when context
        // is available.
        let phase_factor = (1.0 + phase.cos()) / 2.0;
        let alignment_gate = context.map_or(1.0, |c| 0.5 + 0.5 * c.valence_alignment);
        f[0] = resonance * trust * phase_factor * cfg.coupling_strength * alignment_gate;

        // Resonance: driven toward the speakers' emotional correlation,
        // reinforced by arousal synchrony; a slow natural oscillation
        // stands in when no dialogue context exists.
        match context {
            Some(c) => {
                let correlation = (c.emotional_correlation + 1.0) / 2.0;
                f[1] = correlation * (1.0 - resonance) - (1.0 - correlation) * resonance
                    + 0.3 * (c.arousal_synchrony - 0.5);
            }
            None => {
                f[1] = (2.0 * phase).sin() * 0.3;
            }
        }

        // Growth: positive past the connection threshold, decaying when
        // disconnected.
        if connection > cfg.growth_threshold {
            f[2] = (connection - cfg.growth_threshold) * (1.0 - growth.abs());
        } else {
            f[2] = -growth * 0.5;
        }

        // Trust: builds slowly with connection, erodes without it.
        f[3] = connection * (1.0 - trust) * 0.3 - (1.0 - connection) * trust * 0.1;

        // Phase advances with overall system energy.
        let energy = (connection + resonance + growth.abs() + trust) / 4.0;
        f[4] = cfg.phase_velocity * (1.0 + energy);

        // Pairwise couplings through the interaction matrix.
        for (i, row) in cfg.interaction_matrix.iter().enumerate() {
            let coupled: f64 = row
                .iter()
                .zip(&x[..4])
                .map(|(coefficient, component)| coefficient * component)
                .sum();
            f[i] += coupled * 0.1;
        }

        // Decay term; phase does not decay.
        let mut dx = [0.0_f64; 5];
        for i in 0..4 {
            dx[i] = f[i] - cfg.lambda_decay * x[i];
        }
        dx[4] = f[4];

        // Zero-crossing boundaries clip the derivative, never reflect.
        for i in 0..4 {
            if (x[i] <= 0.0 && dx[i] < 0.0) || (x[i] >= 1.0 && dx[i] > 0.0) {
                dx[i] = 0.0;
            }
        }

        dx
    }

    /// Advance the state over `elapsed_seconds` of wall clock, holding
    /// `context` constant. Returns the new state, or
    /// [`EngineError::IntegratorDivergence`] leaving the caller to keep
    /// the last stable state.
    pub fn evolve(
        &self,
        state: RelationshipState,
        elapsed_seconds: f64,
        context: Option<&EquationContext>,
    ) -> Result<RelationshipState> {
        if elapsed_seconds <= 0.0 {
            return Ok(state);
        }
        let duration = elapsed_seconds / 3600.0; // equation runs in hours
        let mut x = state.to_vector();
        let mut t = 0.0_f64;
        let mut h = duration.min(0.05);
        let mut steps = 0usize;

        // The epsilon guard stops a final sub-ulp step from spinning.
        while duration - t > 1e-12 {
            steps += 1;
            if steps > MAX_STEPS {
                return Err(EngineError::IntegratorDivergence {
                    t: t * 3600.0,
                    reason: "step limit exceeded".to_string(),
                });
            }
            if h > duration - t {
                h = duration - t;
            }

            let (next, error) = self.rk45_step(&x, h, context);
            if next.iter().any(|v| !v.is_finite()) {
                return Err(EngineError::IntegratorDivergence {
                    t: t * 3600.0,
                    reason: "non-finite state".to_string(),
                });
            }

            let scale = x
                .iter()
                .map(|v| v.abs().max(1.0))
                .fold(1.0_f64, f64::max);
            let tolerance = RTOL * scale;

            if error <= tolerance || h <= 1e-12 {
                t += h;
                x = next;
                // Keep the bounded components inside their domain; the
                // clipped derivative already prevents real excursions,
                // this only erases floating-point dust.
                for v in &mut x[..4] {
                    *v = v.clamp(0.0, 1.0);
                }
            }

            // Standard step-size controller for an embedded 4(5) pair.
            let factor = if error > 0.0 {
                (0.9 * (tolerance / error).powf(0.2)).clamp(0.2, 5.0)
            } else {
                5.0
            };
            h = (h * factor).max(1e-12);
        }

        Ok(RelationshipState::from_vector(x))
    }

    /// One Dormand–Prince step: returns (5th-order solution, error estimate).
    fn rk45_step(
        &self,
        x: &[f64; 5],
        h: f64,
        context: Option<&EquationContext>,
    ) -> ([f64; 5], f64) {
        // Dormand-Prince RK45 tableau.
        const A: [[f64; 6]; 6] = [
            [1.0 / 5.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            [3.0 / 40.0, 9.0 / 40.0, 0.0, 0.0, 0.0, 0.0],
            [44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0, 0.0, 0.0, 0.0],
            [
                19372.0 / 6561.0,
                -25360.0 / 2187.0,
                64448.0 / 6561.0,
                -212.0 / 729.0,
                0.0,
                0.0,
            ],
            [
                9017.0 / 3168.0,
                -355.0 / 33.0,
                46732.0 / 5247.0,
                49.0 / 176.0,
                -5103.0 / 18656.0,
                0.0,
            ],
            [
                35.0 / 384.0,
                0.0,
                500.0 / 1113.0,
                125.0 / 192.0,
                -2187.0 / 6784.0,
                11.0 / 84.0,
            ],
        ];
        // 5th-order weights (same as the last A row, FSAL form).
        const B5: [f64; 7] = [
            35.0 / 384.0,
            0.0,
            500.0 / 1113.0,
            125.0 / 192.0,
            -2187.0 / 6784.0,
            11.0 / 84.0,
            0.0,
        ];
        // 4th-order embedded weights.
        const B4: [f64; 7] = [
            5179.0 / 57600.0,
            0.0,
            7571.0 / 16695.0,
            393.0 / 640.0,
            -92097.0 / 339200.0,
            187.0 / 2100.0,
            1.0 / 40.0,
        ];

        let mut k = [[0.0_f64; 5]; 7];
        k[0] = self.derivative(x, context);
        for stage in 1..7 {
            let mut xs = *x;
            for (j, kj) in k.iter().enumerate().take(stage) {
                let a = A[stage - 1][j];
                for d in 0..5 {
                    xs[d] += h * a * kj[d];
                }
            }
            k[stage] = self.derivative(&xs, context);
        }

        let mut x5 = *x;
        let mut x4 = *x;
        for d in 0..5 {
            for (j, kj) in k.iter().enumerate() {
                x5[d] += h * B5[j] * kj[d];
                x4[d] += h * B4[j] * kj[d];
            }
        }

        let error = x5
            .iter()
            .zip(&x4)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0_f64, f64::max);
        (x5, error)
    }

    /// Apply a discrete interaction event.
    pub fn apply_event(
        &self,
        state: RelationshipState,
        kind: EventKind,
        intensity: f64,
    ) -> RelationshipState {
        let intensity = intensity.clamp(0.0, 1.0);
        let mut x = state.to_vector();
        match kind {
            EventKind::PositiveInteraction => {
                x[0] = (x[0] + 0.1 * intensity).min(1.0);
                x[1] = (x[1] + 0.15 * intensity).min(1.0);
                x[4] += std::f64::consts::FRAC_PI_6;
            }
            EventKind::CollaborativeWork => {
                x[2] = (x[2] + 0.1 * intensity).min(1.0);
                x[3] = (x[3] + 0.05 * intensity).min(1.0); // trust moves slower
                x[4] += std::f64::consts::FRAC_PI_4;
            }
            EventKind::Conflict => {
                x[1] = (x[1] - 0.2 * intensity).max(0.0);
                if x[3] > 0.6 {
                    // Conflict strengthens an already-strong bond.
                    x[3] = (x[3] + 0.02).min(1.0);
                } else {
                    x[3] = (x[3] - 0.1 * intensity).max(0.0);
                }
                x[4] += std::f64::consts::PI;
            }
            EventKind::Support => {
                x[0] = (x[0] + 0.05 * intensity).min(1.0);
                x[3] = (x[3] + 0.1 * intensity).min(1.0);
                x[4] += std::f64::consts::FRAC_PI_3;
            }
            EventKind::Separation => {
                if x[0] > 0.7 {
                    x[0] = (x[0] - 0.05 * intensity).max(0.7);
                } else {
                    x[0] = (x[0] - 0.15 * intensity).max(0.0);
                }
                x[1] *= 0.8;
            }
        }
        RelationshipState::from_vector(x)
    }

    /// Forecast stability over `horizon_hours` without external context,
    /// sampling the trajectory hourly.
    pub fn predict_stability(
        &self,
        state: RelationshipState,
        horizon_hours: u32,
    ) -> Result<StabilityForecast> {
        let mut current = state;
        let samples = horizon_hours.max(1);
        let mut connections = Vec::with_capacity(samples as usize + 1);
        connections.push(state.connection);

        for _ in 0..samples {
            current = self.evolve(current, 3600.0, None)?;
            connections.push(current.connection);
        }

        let n = connections.len() as f64;
        let average_connection = connections.iter().sum::<f64>() / n;
        let minimum_connection = connections.iter().copied().fold(f64::INFINITY, f64::min);
        let connection_variance = connections
            .iter()
            .map(|c| (c - average_connection).powi(2))
            .sum::<f64>()
            / n;

        let drift = state.distance(&current);
        let stability_score =
            ((1.0 - drift) * average_connection * (1.0 - connection_variance)).clamp(0.0, 1.0);

        Ok(StabilityForecast {
            stability_score,
            drift,
            average_connection,
            minimum_connection,
            connection_variance,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn equation() -> LivingEquation {
        LivingEquation::new(LivingEquationConfig::default())
    }

    #[test]
    fn test_default_state_is_valid() {
        assert!(RelationshipState::default().is_valid());
    }

    #[test]
    fn test_evolution_stays_bounded() {
        let eq = equation();
        let mut state = RelationshipState::default();
        for _ in 0..24 {
            state = eq.evolve(state, 3600.0, None).unwrap();
            assert!(state.is_valid(), "state left its domain: {state:?}");
        }
    }

    #[test]
    fn test_phase_reduced_mod_tau() {
        let eq = equation();
        let state = eq
            .evolve(RelationshipState::default(), 100.0 * 3600.0, None)
            .unwrap();
        assert!((0.0..TAU).contains(&state.phase));
    }

    #[test]
    fn test_zero_elapsed_is_identity() {
        let eq = equation();
        let state = RelationshipState::default();
        assert_eq!(eq.evolve(state, 0.0, None).unwrap(), state);
    }

    #[test]
    fn test_positive_context_raises_connection() {
        let eq = equation();
        let state = RelationshipState::default();
        let context = EquationContext {
            emotional_correlation: 0.9,
            valence_alignment: 0.95,
            arousal_synchrony: 0.9,
        };
        let evolved = eq.evolve(state, 1800.0, Some(&context)).unwrap();
        assert!(
            evolved.connection > state.connection,
            "connection should rise under aligned context: {evolved:?}"
        );
        assert!(evolved.resonance > state.resonance);
    }

    #[test]
    fn test_positive_interaction_event() {
        let eq = equation();
        let state = RelationshipState::default();
        let bumped = eq.apply_event(state, EventKind::PositiveInteraction, 1.0);
        assert!((bumped.connection - 0.6).abs() < 1e-9);
        assert!((bumped.resonance - 0.65).abs() < 1e-9);
        assert!(bumped.phase > state.phase);
    }

    #[test]
    fn test_conflict_strengthens_high_trust() {
        let eq = equation();
        let mut state = RelationshipState::default();
        state.trust = 0.8;
        let after = eq.apply_event(state, EventKind::Conflict, 1.0);
        assert!(after.trust > 0.8);

        state.trust = 0.3;
        let after = eq.apply_event(state, EventKind::Conflict, 1.0);
        assert!(after.trust < 0.3);
    }

    #[test]
    fn test_separation_floors_strong_connection() {
        let eq = equation();
        let mut state = RelationshipState::default();
        state.connection = 0.9;
        let after = eq.apply_event(state, EventKind::Separation, 1.0);
        assert!(after.connection >= 0.7);
    }

    #[test]
    fn test_event_intensity_clamped() {
        let eq = equation();
        let state = RelationshipState::default();
        let a = eq.apply_event(state, EventKind::PositiveInteraction, 50.0);
        let b = eq.apply_event(state, EventKind::PositiveInteraction, 1.0);
        assert_eq!(a.connection, b.connection);
    }

    #[test]
    fn test_context_from_affect_requires_both_speakers() {
        let affect = Affect::default();
        assert!(EquationContext::from_affect(&affect).is_none());
    }

    #[test]
    fn test_stability_forecast_in_range() {
        let eq = equation();
        let forecast = eq
            .predict_stability(RelationshipState::default(), 12)
            .unwrap();
        assert!((0.0..=1.0).contains(&forecast.stability_score));
        assert!(forecast.minimum_connection <= forecast.average_connection);
        assert!(forecast.connection_variance >= 0.0);
    }

    #[test]
    fn test_variance_damps_stability() {
        let eq = equation();
        let forecast = eq
            .predict_stability(RelationshipState::default(), 12)
            .unwrap();
        // The score is bounded by its variance-free counterpart; an
        // oscillating trajectory can only lose stability, never gain it.
        let undamped = ((1.0 - forecast.drift) * forecast.average_connection).clamp(0.0, 1.0);
        assert!(forecast.stability_score <= undamped + 1e-12);
        if forecast.connection_variance > 0.0 && undamped > 0.0 {
            assert!(forecast.stability_score < undamped);
        }
    }
}
