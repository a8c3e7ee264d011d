//! Nutrition program generation from completed questionnaire answers.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};

use carebot_providers::{ProgramGenerator, Responder};
use carebot_shared::{Answers, CarebotError, GenerationRequest, Result};

use crate::responder::ResponderKind;

const RULE_WIDE: usize = 50;
const RULE: usize = 30;
const RULE_DAY: usize = 20;

/// Two-step generator: analyse the health data, then write the program.
pub struct NutritionProgramGenerator {
    backend: Arc<dyn Responder>,
}

impl NutritionProgramGenerator {
    pub fn new(backend: Arc<dyn Responder>) -> Self {
        Self { backend }
    }

    async fn ask(&self, step: &str, prompt: String) -> Result<String> {
        let request = GenerationRequest::new(ResponderKind::Nutrition.system_prompt(), prompt);
        let text = self
            .backend
            .generate(&request)
            .await
            .map_err(|e| CarebotError::GenerationFailure(format!("{step} failed: {e}")))?;
        if text.trim().is_empty() {
            return Err(CarebotError::GenerationFailure(format!(
                "{step} returned no text"
            )));
        }
        debug!(step, chars = text.len(), "generation step done");
        Ok(text)
    }
}

#[async_trait]
impl ProgramGenerator for NutritionProgramGenerator {
    #[instrument(skip_all, fields(answers = answers.len()))]
    async fn generate_program(&self, answers: &Answers) -> Result<String> {
        let data = answers.to_pretty_json();
        let analysis = self.ask("health analysis", analysis_prompt(&data)).await?;
        let raw = self
            .ask("program generation", program_prompt(&data, &analysis))
            .await?;
        let program = format_program(&raw);
        info!(chars = program.len(), "nutrition program generated");
        Ok(program)
    }
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

pub(crate) fn analysis_prompt(user_data: &str) -> String {
    format!(
        "Analyze the following user health data and provide insights for nutrition planning:

User Data: {user_data}

Provide analysis on:
1. Health risk factors
2. Nutritional needs based on age, gender, and activity level
3. Special considerations for pregnancy/postpartum if applicable
4. Dietary restrictions and alternatives
5. Recommended calorie and macronutrient ranges
6. Important health notes for the nutrition program

Format your response as a clear, structured analysis."
    )
}

pub(crate) fn program_prompt(user_data: &str, analysis: &str) -> String {
    format!(
        "Create a comprehensive, personalized nutrition program based on the following information:

USER HEALTH DATA:
{user_data}

HEALTH ANALYSIS:
{analysis}

REQUIREMENTS:
1. Create a detailed, personalized nutrition program
2. Include meal plans, recipes, and shopping lists
3. Consider all health factors, dietary preferences, and restrictions
4. Make it safe and medically appropriate
5. Make it practical and easy to follow
6. Include nutritional information and tips

FORMAT:
- Use clear headings and sections
- Include meal plans with recipes
- Add shopping lists
- Include nutritional tips and recommendations
- Make it easy to read and follow

IMPORTANT: Format your response as a well-structured, readable text document with clear sections, not as JSON. Use headings, bullet points, and proper formatting to make it easy to read."
    )
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// Render a JSON-object reply into readable sections; anything else is
/// returned unchanged.
pub fn format_program(raw: &str) -> String {
    let trimmed = raw.trim();
    if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
        return raw.to_string();
    }
    match serde_json::from_str::<Map<String, Value>>(trimmed) {
        Ok(data) => render_sections(&data),
        Err(_) => raw.to_string(),
    }
}

fn render_sections(data: &Map<String, Value>) -> String {
    let mut out: Vec<String> = Vec::new();

    if let Some(intro) = data.get("introduction") {
        heading(&mut out, "PERSONALIZED NUTRITION PROGRAM", '=', RULE_WIDE);
        out.push(text_of(intro));
        out.push(String::new());
    }

    if let Some(disclaimer) = data.get("disclaimer") {
        heading(&mut out, "IMPORTANT DISCLAIMER", '-', RULE);
        out.push(text_of(disclaimer));
        out.push(String::new());
    }

    if let Some(Value::Object(nutrients)) = data.get("nutrientRecommendations") {
        heading(&mut out, "NUTRIENT RECOMMENDATIONS", '-', RULE);
        for (nutrient, info) in nutrients {
            out.push(format!("\n* {}:", title_case(nutrient)));
            if let Some(sources) = info.get("sources") {
                out.push(format!("   Sources: {}", list_of(sources).join(", ")));
            }
            if let Some(rec) = info.get("recommendations") {
                out.push(format!("   {}", text_of(rec)));
            }
        }
        out.push(String::new());
    }

    if let Some(Value::Object(days)) = data.get("mealPlan") {
        heading(&mut out, "DAILY MEAL PLAN", '-', RULE);
        for (day, meals) in days {
            out.push(format!("\n{}", title_case(day).to_uppercase()));
            out.push("-".repeat(RULE_DAY));
            if let Value::Object(meals) = meals {
                for (key, meal) in meals {
                    render_meal(&mut out, key, meal);
                }
            }
            out.push(String::new());
        }
    }

    if let Some(items) = data.get("shoppingList") {
        heading(&mut out, "SHOPPING LIST", '-', RULE);
        out.extend(list_of(items).into_iter().map(|item| format!("   - {item}")));
        out.push(String::new());
    }

    if let Some(guide) = data.get("mealPrepGuide") {
        heading(&mut out, "MEAL PREP GUIDE", '-', RULE);
        out.push(text_of(guide));
        out.push(String::new());
    }

    if let Some(tips) = data.get("tipsForSuccess") {
        heading(&mut out, "TIPS FOR SUCCESS", '-', RULE);
        out.push(text_of(tips));
        out.push(String::new());
    }

    out.join("\n")
}

fn render_meal(out: &mut Vec<String>, key: &str, meal: &Value) {
    if key == "snacks" {
        let snacks = list_of(meal);
        if !snacks.is_empty() {
            out.push("\nSnacks:".to_string());
            out.extend(snacks.into_iter().map(|s| format!("   - {s}")));
        }
        return;
    }

    let field = |name: &str, default: &str| {
        meal.get(name)
            .map(text_of)
            .unwrap_or_else(|| default.to_string())
    };
    out.push(format!("\n{}", field("name", "Unknown Meal")));
    out.push(format!("   Calories: {}", field("calories", "Calories not specified")));

    if let Some(Value::Object(macros)) = meal.get("macros") {
        let parts: Vec<String> = [("protein", "Protein"), ("carbs", "Carbs"), ("fat", "Fat")]
            .into_iter()
            .filter_map(|(key, label)| macros.get(key).map(|v| format!("{label}: {}g", text_of(v))))
            .collect();
        if !parts.is_empty() {
            out.push(format!("   Macros: {}", parts.join(", ")));
        }
    }
    out.push(format!("   Recipe: {}", field("recipe", "No recipe provided")));
}

fn heading(out: &mut Vec<String>, title: &str, rule: char, width: usize) {
    out.push(title.to_string());
    out.push(rule.to_string().repeat(width));
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn list_of(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().map(text_of).collect(),
        Value::Null => Vec::new(),
        other => vec![text_of(other)],
    }
}

fn title_case(key: &str) -> String {
    key.replace('_', " ")
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
