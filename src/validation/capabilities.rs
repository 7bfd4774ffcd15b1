use crate::{
    errors::{capability_message, ClassifiedError},
    providers::{Modality, ModelCapabilityRegistry},
    utils::data_types::ChatRequest,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityCheck {
    Valid,
    Invalid {
        modality: Modality,
        model: String,
        explanation: String,
    },
}

impl CapabilityCheck {
    pub fn into_result(self) -> Result<(), ClassifiedError> {
        match self {
            CapabilityCheck::Valid => Ok(()),
            CapabilityCheck::Invalid {
                modality, model, ..
            } => Err(ClassifiedError::unsupported(modality, &model)),
        }
    }
}

/// Rejects content parts the target model cannot read, before anything is sent
/// upstream. Text and unrecognised part types are not checked.
pub fn pre_validate(
    request: &ChatRequest,
    registry: &dyn ModelCapabilityRegistry,
) -> CapabilityCheck {
    let parts = request
        .messages
        .iter()
        .filter_map(|message| message.content.as_ref())
        .flat_map(|content| content.parts());

    for part in parts {
        let Some(modality) = Modality::from_part_type(&part.kind) else {
            continue;
        };
        if modality == Modality::Text {
            continue;
        }
        if !registry.supports(&request.model, modality) {
            return CapabilityCheck::Invalid {
                modality,
                model: request.model.clone(),
                explanation: capability_message(modality, &request.model),
            };
        }
    }
    CapabilityCheck::Valid
}
