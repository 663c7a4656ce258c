use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::{Map, Value};

use crate::geometry::{GenerationError, PathGenerator};
use crate::payload::types::{OrderPayload, OrderType};

pub const DEFAULT_ORDER_NUMBER_PREFIX: &str = "ORD-";

/// Attributes copied onto every payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PayloadAttributes {
    pub order_number_prefix: String,
    pub location: String,
    pub poc_order: String,
    pub custom_fields: Map<String, Value>,
}

impl PayloadAttributes {
    fn order_number(&self, index: usize) -> String {
        format!("{}{:06}", self.order_number_prefix, index + 1)
    }
}

#[derive(Debug)]
pub struct PayloadFactory {
    generator: PathGenerator,
    attributes: PayloadAttributes,
    shuffle_seed: Option<u64>,
}

impl PayloadFactory {
    pub fn new(generator: PathGenerator, attributes: PayloadAttributes) -> Self {
        Self {
            generator,
            attributes,
            shuffle_seed: None,
        }
    }

    /// Interleave the two order types with a deterministic shuffle instead of
    /// putting every activate-flow order first.
    pub fn with_shuffle_seed(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    /// Builds the full work list. The first `activated` slots are
    /// activate-flow orders and the rest accept-flow, unless a shuffle seed is
    /// set. Order numbers and geometries follow list position either way.
    ///
    /// Consumes the factory: the generator's grid cursor only moves forward.
    pub fn generate_all(
        mut self,
        total: usize,
        activated: usize,
    ) -> Result<Vec<OrderPayload>, GenerationError> {
        if activated > total {
            return Err(GenerationError::ActivatedExceedsTotal { activated, total });
        }

        let mut types: Vec<OrderType> = std::iter::repeat(OrderType::Activate)
            .take(activated)
            .chain(std::iter::repeat(OrderType::Accept).take(total - activated))
            .collect();
        if let Some(seed) = self.shuffle_seed {
            types.shuffle(&mut StdRng::seed_from_u64(seed));
        }

        let mut payloads = Vec::with_capacity(total);
        for (index, order_type) in types.into_iter().enumerate() {
            let geometry = self.generator.next(index)?;
            payloads.push(OrderPayload {
                order_number: self.attributes.order_number(index),
                order_type,
                location: self.attributes.location.clone(),
                poc_order: self.attributes.poc_order.clone(),
                timestamp: Utc::now(),
                custom_fields: self.attributes.custom_fields.clone(),
                geometry,
            });
        }

        tracing::info!(
            total,
            activated,
            accepted = total - activated,
            shuffled = self.shuffle_seed.is_some(),
            "generated order payloads"
        );
        Ok(payloads)
    }
}
