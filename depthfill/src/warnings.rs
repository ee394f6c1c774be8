use crate::{config::Config, constraints::Family, observations::Observations};

/// Something suspicious about the inputs. Reconstruction still goes ahead.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(test, derive(PartialEq))]
pub struct Warning {
    /// The family this is about, if any.
    pub about_family: Option<Family>,
    /// What's wrong.
    pub content: WarningContent,
}

/// What a [`Warning`] is about.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(test, derive(PartialEq))]
#[non_exhaustive]
pub enum WarningContent {
    /// A weight was set for a family whose measurements are missing.
    WeightWithoutObservations,
    /// Measurements or a weight map were given, but the family's weight is zero.
    ObservationsWithoutWeight,
    /// No reference depth, so the centre pixel will be pinned to zero.
    DegenerateAnchor,
    /// One of the range barrier's singularities lies inside the depth bounds.
    RangePoleInsideBounds(f64),
}

/// What each family needs, for linting.
struct Usage {
    family: Family,
    /// The family's required measurements are present.
    measured: bool,
    /// A per-pixel weight map was given.
    has_map: bool,
    /// A positive global weight on its own signals intent to use this family,
    /// i.e. the family is off by default.
    weight_is_intent: bool,
    /// Measurements only this family consumes.
    exclusive: bool,
}

/// Check the inputs for weights and measurements that don't meet.
pub fn lint(observations: &Observations, config: &Config) -> Vec<Warning> {
    let smoothness = &observations.smoothness_weight;
    let has_normals = observations.normals.is_some();
    let usages = [
        Usage {
            family: Family::Inertia,
            measured: observations.inertia_reference().is_some(),
            has_map: observations.inertia_weight.is_some(),
            weight_is_intent: true,
            exclusive: false,
        },
        Usage {
            family: Family::Smoothness,
            measured: true,
            has_map: smoothness.x.is_some() || smoothness.y.is_some(),
            weight_is_intent: false,
            exclusive: false,
        },
        Usage {
            family: Family::Derivative,
            measured: observations.has_duv(),
            has_map: observations.derivative_weight.is_some(),
            weight_is_intent: false,
            exclusive: true,
        },
        Usage {
            family: Family::Normal,
            measured: has_normals,
            has_map: observations.normal_weight.is_some(),
            weight_is_intent: true,
            exclusive: false,
        },
        Usage {
            family: Family::Tangent,
            measured: has_normals,
            has_map: observations.tangent_weight.is_some(),
            weight_is_intent: false,
            exclusive: false,
        },
        Usage {
            family: Family::Range,
            measured: true,
            has_map: observations.range_weight.is_some(),
            weight_is_intent: false,
            exclusive: false,
        },
    ];

    let mut warnings = Vec::default();
    for usage in usages {
        let weight = usage.family.weight(config);
        if !usage.measured && (usage.has_map || (usage.weight_is_intent && weight > 0.0)) {
            warnings.push(Warning {
                about_family: Some(usage.family),
                content: WarningContent::WeightWithoutObservations,
            });
        }
        if weight == 0.0 && (usage.has_map || (usage.exclusive && usage.measured)) {
            warnings.push(Warning {
                about_family: Some(usage.family),
                content: WarningContent::ObservationsWithoutWeight,
            });
        }
    }

    if observations.inertia_reference().is_none() {
        warnings.push(Warning {
            about_family: Some(Family::Inertia),
            content: WarningContent::DegenerateAnchor,
        });
    }

    if config.weights.range > 0.0 {
        let poles = [
            config.range_interval.minimum - 1.0,
            config.range_interval.maximum - 1.0,
        ];
        for pole in poles {
            if (config.minimum_depth..=config.maximum_depth).contains(&pole) {
                warnings.push(Warning {
                    about_family: Some(Family::Range),
                    content: WarningContent::RangePoleInsideBounds(pole),
                });
            }
        }
    }
    warnings
}

impl std::fmt::Display for WarningContent {
    #[mutants::skip]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WarningContent::WeightWithoutObservations => write!(
                f,
                "A weight was given, but the measurements it weighs are missing, so it has no effect"
            ),
            WarningContent::ObservationsWithoutWeight => write!(
                f,
                "Measurements or a weight map were given, but the global weight is 0, so they are ignored"
            ),
            WarningContent::DegenerateAnchor => write!(
                f,
                "There is no reference depth, so the centre pixel is pinned to 0. The result is only meaningful up to an offset."
            ),
            WarningContent::RangePoleInsideBounds(pole) => write!(
                f,
                "The range barrier is infinite at depth {pole}, which is inside the depth bounds"
            ),
        }
    }
}

impl std::fmt::Display for Warning {
    #[mutants::skip]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.about_family {
            Some(family) => write!(f, "{family}: {}", self.content),
            None => write!(f, "{}", self.content),
        }
    }
}
