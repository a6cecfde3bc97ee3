//! LLM-backed candidate generation over OpenRouter.
//!
//! The agent only ever adjusts quantities of ingredients already in the
//! recipe. Its reply is turned into at most one candidate, which the
//! optimizer scores like any other.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::api_connection::connection::ApiConnectionError;
use crate::api_connection::endpoints::{
    ChatCompletionRequest, ChatMessage, JsonSchema, JsonSchemaDefinition, JsonSchemaProperty,
    Provider, ResponseFormat,
};
use crate::config::AgentConfig;
use crate::error::{OptimError, OptimResult};
use crate::optim::candidates::{Candidate, CandidateGenerator, CandidateSource, ProposalContext};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentOperation {
    AdjustQuantity,
    NoChange,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AgentModification {
    pub operation: AgentOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_ingredient_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity_grams: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AgentResponse {
    pub modifications: Vec<AgentModification>,
    #[serde(default)]
    pub overall_reasoning: String,
}

pub struct ExternalAgent {
    provider: Provider,
    config: AgentConfig,
}

impl ExternalAgent {
    pub fn new(provider: Provider, config: AgentConfig) -> Self {
        Self { provider, config }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(Provider::from_agent_config(config), config.clone())
    }

    pub fn build_request(&self, ctx: &ProposalContext<'_>) -> ChatCompletionRequest {
        let (system_prompt, user_prompt) = build_prompts(ctx);
        ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage::system(system_prompt), ChatMessage::user(user_prompt)],
            response_format: Some(ResponseFormat {
                format_type: "json_object".to_string(),
                json_schema: Some(modification_schema()),
            }),
            temperature: Some(self.config.temperature),
            max_tokens: Some(self.config.max_tokens),
        }
    }
}

#[async_trait]
impl CandidateGenerator for ExternalAgent {
    fn name(&self) -> &str {
        "agent"
    }

    async fn propose(&self, ctx: &ProposalContext<'_>) -> OptimResult<Vec<Candidate>> {
        let request = self.build_request(ctx);
        tracing::debug!(iteration = ctx.iteration, "Requesting quantity adjustments from agent");
        let response = self.provider.call_chat_completion(request).await?;
        let content = response.first_content().ok_or(ApiConnectionError::EmptyResponse)?;
        tracing::trace!("Agent response: {}", content);
        Ok(candidate_from_response(content, ctx)?.into_iter().collect())
    }
}

/// System and user prompt for one iteration.
pub fn build_prompts(ctx: &ProposalContext<'_>) -> (String, String) {
    let system_prompt = format!(
        "/no_thinking
You are a recipe rebalancing assistant. Your goal is to adjust ingredient quantities so the recipe's total nutrients move toward the given targets, while keeping the dish culinarily coherent.
You may NOT add, remove or replace ingredients. Only quantities change.
Output a single JSON object and nothing else: no explanatory text, no markdown fences.

The JSON object MUST follow the 'recipe_quantity_adjustments' schema:
{{
  \"modifications\": [
    {{ \"operation\": \"adjust_quantity\", \"original_ingredient_name\": \"butter\", \"quantity_grams\": 20.0, \"reasoning\": \"Less butter lowers fat.\" }}
  ],
  \"overall_reasoning\": \"Why these adjustments move the recipe toward the targets.\"
}}

Rules:
- 'operation' is either 'adjust_quantity' or 'no_change'.
- 'original_ingredient_name' MUST EXACTLY MATCH a name from the ingredient list.
- 'quantity_grams' is the NEW total quantity of that ingredient in grams, never negative.
- Prefer small changes: every gram moved away from the original quantity is penalized.
- Use a single 'no_change' modification if no adjustment would help.

Current loss: {:.6} (lower is better). Suggested relative step size this round: about {:.1}% of an ingredient's quantity.
",
        ctx.loss,
        ctx.step * 100.0
    );

    let ingredients_text = ctx
        .recipe
        .ingredients
        .iter()
        .zip(ctx.quantities.iter().zip(ctx.originals))
        .zip(ctx.bounds)
        .map(|((ingredient, (&q, &q0)), bounds)| {
            let range = if bounds.is_pinned() {
                "fixed".to_string()
            } else if bounds.upper().is_finite() {
                format!("allowed {:.1}-{:.1} g", bounds.lower(), bounds.upper())
            } else {
                format!("at least {:.1} g", bounds.lower())
            };
            format!(
                "- {} (current: {:.1} g, original: {:.1} g, {})",
                ingredient.name, q, q0, range
            )
        })
        .collect::<Vec<String>>()
        .join("\n");

    let targets_text = ctx
        .targets
        .constrained
        .iter()
        .map(|&n| {
            format!(
                "- {}: current {:.2} {}, target {:.2} {}",
                n,
                ctx.profile.aggregated.get(n),
                n.unit(),
                ctx.targets.values.get(n),
                n.unit()
            )
        })
        .collect::<Vec<String>>()
        .join("\n");

    let user_prompt = format!(
        "Recipe: {}

Ingredients:
{}

Total mass: {:.1} g

Nutrient targets for the whole recipe:
{}

Suggest quantity adjustments that bring the constrained nutrients closer to their targets.
Return your answer in the specified JSON format.
",
        ctx.recipe.title, ingredients_text, ctx.profile.total_mass_g, targets_text
    );

    (system_prompt, user_prompt)
}

/// Applies an agent reply to the current quantities. `Ok(None)` means the
/// agent declined or its adjustments changed nothing.
pub fn candidate_from_response(content: &str, ctx: &ProposalContext<'_>) -> OptimResult<Option<Candidate>> {
    let response: AgentResponse = serde_json::from_str(content)
        .map_err(|e| OptimError::AgentResponse(format!("{}: '{}'", e, content)))?;

    let mut quantities = ctx.quantities.to_vec();
    for modification in &response.modifications {
        match modification.operation {
            AgentOperation::NoChange => continue,
            AgentOperation::AdjustQuantity => {
                let name = modification.original_ingredient_name.as_deref().ok_or_else(|| {
                    OptimError::AgentResponse("'original_ingredient_name' missing for adjust_quantity".to_string())
                })?;
                let grams = modification.quantity_grams.ok_or_else(|| {
                    OptimError::AgentResponse(format!("'quantity_grams' missing for adjust_quantity on '{}'", name))
                })?;
                if !grams.is_finite() {
                    return Err(OptimError::AgentResponse(format!(
                        "non-finite quantity {} for '{}'",
                        grams, name
                    )));
                }
                match ctx.recipe.find_ingredient(name) {
                    Some(index) => quantities[index] = ctx.bounds[index].clamp(grams),
                    None => tracing::warn!("Agent adjusted unknown ingredient '{}', ignoring.", name),
                }
            }
        }
    }

    if quantities.as_slice() == ctx.quantities {
        tracing::debug!("Agent proposed no effective change: {}", response.overall_reasoning);
        return Ok(None);
    }
    Ok(Some(Candidate { quantities, source: CandidateSource::Agent }))
}

pub fn modification_schema() -> JsonSchemaDefinition {
    let mut modification_properties = HashMap::new();
    modification_properties.insert(
        "operation".to_string(),
        JsonSchemaProperty {
            r#enum: Some(vec!["adjust_quantity".to_string(), "no_change".to_string()]),
            ..JsonSchemaProperty::of_type("string", "The type of modification to perform.")
        },
    );
    modification_properties.insert(
        "original_ingredient_name".to_string(),
        JsonSchemaProperty::of_type(
            "string",
            "Name of the ingredient to adjust. Must exactly match an ingredient name from the provided list.",
        ),
    );
    modification_properties.insert(
        "quantity_grams".to_string(),
        JsonSchemaProperty::of_type("number", "New total quantity of the ingredient, in grams."),
    );
    modification_properties.insert(
        "reasoning".to_string(),
        JsonSchemaProperty::of_type("string", "Brief reasoning for this specific modification."),
    );

    let modification_schema = JsonSchema {
        schema_type: "object".to_string(),
        properties: modification_properties,
        required: vec!["operation".to_string()],
        additional_properties: Some(false),
    };

    let mut response_properties = HashMap::new();
    response_properties.insert(
        "modifications".to_string(),
        JsonSchemaProperty {
            items: Some(Box::new(modification_schema)),
            ..JsonSchemaProperty::of_type("array", "Quantity adjustments to apply together.")
        },
    );
    response_properties.insert(
        "overall_reasoning".to_string(),
        JsonSchemaProperty::of_type("string", "How the adjustments move the recipe toward the targets."),
    );

    JsonSchemaDefinition {
        name: "recipe_quantity_adjustments".to_string(),
        strict: Some(true),
        schema: JsonSchema {
            schema_type: "object".to_string(),
            properties: response_properties,
            required: vec!["modifications".to_string(), "overall_reasoning".to_string()],
            additional_properties: Some(false),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nutrients::{Nutrient, NutrientVector};
    use crate::optim::nutri_eval::LossFunction;
    use crate::optim::targets::{resolve, TargetSpec};
    use crate::recipe::{Ingredient, QuantityBounds, Recipe};
    use crate::recipe_aggregator::aggregate;

    fn with_context<R>(f: impl FnOnce(&ProposalContext<'_>) -> R) -> R {
        let recipe = Recipe::new(
            "Crepes",
            vec![
                Ingredient::new("flour", 125.0, NutrientVector { carbohydrate_g: 0.76, ..Default::default() }),
                Ingredient::new("butter", 24.0, NutrientVector { fat_g: 0.82, ..Default::default() }),
                Ingredient::new("salt", 1.0, NutrientVector { salt_g: 1.0, ..Default::default() }),
            ],
            vec![],
        );
        let profile = aggregate(&recipe).unwrap();
        let targets = resolve(&TargetSpec::new().relative(Nutrient::Fat, -20.0), &profile).unwrap();
        let quantities = recipe.quantities();
        let originals = recipe.original_quantities();
        let bounds = vec![
            QuantityBounds::default(),
            QuantityBounds { min_g: Some(10.0), max_g: Some(30.0) },
            QuantityBounds::pinned(1.0),
        ];
        let loss_fn = LossFunction::default();
        let ctx = ProposalContext {
            recipe: &recipe,
            quantities: &quantities,
            originals: &originals,
            bounds: &bounds,
            targets: &targets,
            profile: &profile,
            loss: 0.04,
            loss_fn: &loss_fn,
            step: 0.1,
            iteration: 3,
        };
        f(&ctx)
    }

    #[test]
    fn test_prompts_mention_ingredients_and_targets() {
        let (system, user) = with_context(build_prompts);
        assert!(system.contains("adjust_quantity"));
        assert!(system.contains("0.040000"));
        assert!(user.contains("- flour (current: 125.0 g"));
        assert!(user.contains("allowed 10.0-30.0 g"));
        assert!(user.contains("salt (current: 1.0 g, original: 1.0 g, fixed)"));
        assert!(user.contains("fat_g: current 19.68 g, target 15.74 g"));
    }

    #[test]
    fn test_adjustments_are_applied_and_clamped() {
        let content = r#"{
            "modifications": [
                { "operation": "adjust_quantity", "original_ingredient_name": "Butter", "quantity_grams": 5.0 },
                { "operation": "adjust_quantity", "original_ingredient_name": "salt", "quantity_grams": 3.0 },
                { "operation": "adjust_quantity", "original_ingredient_name": "flour", "quantity_grams": 120.0 }
            ],
            "overall_reasoning": "less butter"
        }"#;
        let candidate = with_context(|ctx| candidate_from_response(content, ctx)).unwrap().unwrap();
        assert_eq!(candidate.source, CandidateSource::Agent);
        // butter clamped to its minimum, salt pinned
        assert_eq!(candidate.quantities, vec![120.0, 10.0, 1.0]);
    }

    #[test]
    fn test_no_change_and_unknown_ingredients_yield_nothing() {
        let no_change = r#"{ "modifications": [ { "operation": "no_change" } ], "overall_reasoning": "fine" }"#;
        assert!(with_context(|ctx| candidate_from_response(no_change, ctx)).unwrap().is_none());

        let unknown = r#"{ "modifications": [ { "operation": "adjust_quantity", "original_ingredient_name": "cream", "quantity_grams": 50 } ], "overall_reasoning": "" }"#;
        assert!(with_context(|ctx| candidate_from_response(unknown, ctx)).unwrap().is_none());
    }

    #[test]
    fn test_malformed_responses_are_errors() {
        let cases = [
            "not json",
            r#"{ "modifications": [ { "operation": "replace_ingredient" } ] }"#,
            r#"{ "modifications": [ { "operation": "adjust_quantity", "quantity_grams": 3 } ] }"#,
            r#"{ "modifications": [ { "operation": "adjust_quantity", "original_ingredient_name": "flour" } ] }"#,
        ];
        for content in cases {
            let result = with_context(|ctx| candidate_from_response(content, ctx));
            assert!(matches!(result, Err(OptimError::AgentResponse(_))), "{}", content);
        }
    }

    #[test]
    fn test_schema_only_allows_quantity_operations() {
        let schema = serde_json::to_value(modification_schema()).unwrap();
        let items = &schema["schema"]["properties"]["modifications"]["items"];
        assert_eq!(
            items["properties"]["operation"]["enum"],
            serde_json::json!(["adjust_quantity", "no_change"])
        );
        assert_eq!(items["properties"]["quantity_grams"]["type"], "number");
    }

    #[tokio::test]
    async fn test_missing_api_key_is_agent_error() {
        let config = AgentConfig {
            api_key_env_var: "RECIPE_REBALANCE_TEST_KEY_THAT_IS_NOT_SET".to_string(),
            ..AgentConfig::default()
        };
        let agent = ExternalAgent::from_config(&config);
        let recipe = Recipe::new(
            "t",
            vec![Ingredient::new("flour", 100.0, NutrientVector { carbohydrate_g: 0.7, ..Default::default() })],
            vec![],
        );
        let profile = aggregate(&recipe).unwrap();
        let targets = resolve(&TargetSpec::new().relative(Nutrient::Carbohydrate, -10.0), &profile).unwrap();
        let quantities = recipe.quantities();
        let bounds = vec![QuantityBounds::default()];
        let loss_fn = LossFunction::default();
        let ctx = ProposalContext {
            recipe: &recipe,
            quantities: &quantities,
            originals: &quantities,
            bounds: &bounds,
            targets: &targets,
            profile: &profile,
            loss: 0.01,
            loss_fn: &loss_fn,
            step: 0.1,
            iteration: 0,
        };
        let result = agent.propose(&ctx).await;
        assert!(matches!(result, Err(OptimError::Agent(ApiConnectionError::MissingApiKey(_)))));
    }
}
