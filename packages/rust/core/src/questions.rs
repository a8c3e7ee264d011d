//! The fixed nutrition questionnaire.

use carebot_shared::{FieldType, QuestionSpec};
use FieldType::{Float, Int, String as Text};

const fn q(field: &'static str, prompt: &'static str, field_type: FieldType) -> QuestionSpec {
    QuestionSpec {
        field,
        prompt,
        field_type,
    }
}

/// Questions asked in order; answers are stored under `field`.
pub static NUTRITION_QUESTIONS: [QuestionSpec; 29] = [
    q("age", "What is your age?", Int),
    q("weight", "What is your current weight (in kg)?", Float),
    q("height", "What is your height (in cm)?", Float),
    q(
        "activity_level",
        "What is your activity level? (sedentary/light/moderate/active/very_active)",
        Text,
    ),
    q(
        "occupation",
        "What is your occupation? (desk_job/physical_work/mixed)",
        Text,
    ),
    q("sleep_hours", "How many hours do you sleep per night?", Int),
    q("stress_level", "What is your stress level? (low/medium/high)", Text),
    q("pregnancy_status", "Are you currently pregnant? (yes/no)", Text),
    q("pregnancy_weeks", "How many weeks pregnant are you?", Int),
    q("postpartum_weeks", "How many weeks ago did you give birth?", Int),
    q(
        "delivery_method",
        "What was your delivery method? (vaginal/caesarean/assisted)",
        Text,
    ),
    q("breastfeeding", "Are you breastfeeding? (yes/no)", Text),
    q(
        "breastfeeding_weeks",
        "If breastfeeding, how many weeks have you been breastfeeding?",
        Int,
    ),
    q(
        "allergies",
        "Do you have any food allergies? (list them or 'none')",
        Text,
    ),
    q(
        "medical_conditions",
        "Do you have any medical conditions? (diabetes/heart_disease/hypertension/none)",
        Text,
    ),
    q(
        "medications",
        "Are you taking any medications? (list them or 'none')",
        Text,
    ),
    q(
        "digestive_issues",
        "Do you have any digestive issues? (ibs/acid_reflux/none)",
        Text,
    ),
    q(
        "dietary_preferences",
        "Any dietary preferences? (vegetarian/vegan/keto/paleo/mediterranean/none)",
        Text,
    ),
    q(
        "food_dislikes",
        "Any foods you dislike or avoid? (list them or 'none')",
        Text,
    ),
    q(
        "cooking_skills",
        "What are your cooking skills? (beginner/intermediate/advanced)",
        Text,
    ),
    q(
        "goals",
        "What are your nutrition goals? (weight_loss/weight_gain/maintenance/health_improvement/energy_boost)",
        Text,
    ),
    q(
        "program_duration",
        "How many days would you like the program for? (default: 1)",
        Int,
    ),
    q(
        "meals_per_day",
        "How many meals per day do you prefer? (3/4/5/6)",
        Int,
    ),
    q("snacks", "Do you want snacks included? (yes/no)", Text),
    q(
        "cooking_time",
        "How much time can you spend cooking per day? (quick/medium/elaborate)",
        Text,
    ),
    q("budget", "What's your food budget level? (low/medium/high)", Text),
    q(
        "cuisine_preference",
        "Any cuisine preferences? (mediterranean/asian/italian/mexican/none)",
        Text,
    ),
    q(
        "spice_tolerance",
        "What's your spice tolerance? (mild/medium/hot)",
        Text,
    ),
    q(
        "meal_prep",
        "Do you prefer meal prep or daily cooking? (meal_prep/daily_cooking)",
        Text,
    ),
];
