//! Markdown rendering of an archived program.

use chrono::{DateTime, Utc};

use carebot_shared::{AnswerValue, Answers};

/// One titled block of the answers summary.
struct Section {
    title: &'static str,
    rows: Vec<(&'static str, &'static str)>,
}

fn sections(answers: &Answers) -> Vec<Section> {
    let mut out = vec![Section {
        title: "Personal information",
        rows: vec![
            ("age", "Age"),
            ("weight", "Weight (kg)"),
            ("height", "Height (cm)"),
            ("activity_level", "Activity level"),
            ("occupation", "Occupation"),
            ("sleep_hours", "Sleep (hours)"),
            ("stress_level", "Stress level"),
        ],
    }];

    if is_yes(answers.get("pregnancy_status")) {
        out.push(Section {
            title: "Pregnancy",
            rows: vec![("pregnancy_weeks", "Weeks pregnant")],
        });
    }

    if is_positive(answers.get("postpartum_weeks")) {
        let mut rows = vec![
            ("postpartum_weeks", "Weeks since birth"),
            ("delivery_method", "Delivery method"),
            ("breastfeeding", "Breastfeeding"),
        ];
        if is_yes(answers.get("breastfeeding")) {
            rows.push(("breastfeeding_weeks", "Weeks breastfeeding"));
        }
        out.push(Section {
            title: "Postpartum",
            rows,
        });
    }

    out.push(Section {
        title: "Health",
        rows: vec![
            ("allergies", "Allergies"),
            ("medical_conditions", "Medical conditions"),
            ("medications", "Medications"),
            ("digestive_issues", "Digestive issues"),
        ],
    });
    out.push(Section {
        title: "Preferences",
        rows: vec![
            ("dietary_preferences", "Dietary preferences"),
            ("food_dislikes", "Foods avoided"),
            ("cooking_skills", "Cooking skills"),
            ("goals", "Goals"),
            ("program_duration", "Program length (days)"),
            ("meals_per_day", "Meals per day"),
            ("snacks", "Snacks"),
            ("cooking_time", "Cooking time"),
            ("budget", "Budget"),
            ("cuisine_preference", "Cuisine"),
            ("spice_tolerance", "Spice tolerance"),
            ("meal_prep", "Meal prep"),
        ],
    });
    out
}

fn is_yes(value: Option<&AnswerValue>) -> bool {
    matches!(value, Some(AnswerValue::Text(s)) if s.trim().eq_ignore_ascii_case("yes"))
}

fn is_positive(value: Option<&AnswerValue>) -> bool {
    match value {
        Some(AnswerValue::Int(n)) => *n > 0,
        Some(AnswerValue::Float(n)) => *n > 0.0,
        _ => false,
    }
}

/// Pipes and newlines would break a table row.
fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace(['\r', '\n'], " ")
}

/// Render the full document: header, answers summary, then the program text.
pub(crate) fn render_program(
    username: &str,
    created_at: DateTime<Utc>,
    text: &str,
    answers: &Answers,
) -> String {
    let mut doc = String::from("# Personalized Nutrition Program\n\n");
    doc.push_str(&format!("**Prepared for:** {username}  \n"));
    doc.push_str(&format!(
        "**Created:** {}\n\n",
        created_at.format("%d/%m/%Y %H:%M")
    ));

    if !answers.is_empty() {
        doc.push_str("## Your answers\n\n");
        for section in sections(answers) {
            doc.push_str(&format!("### {}\n\n| | |\n|---|---|\n", section.title));
            for (field, label) in section.rows {
                let value = answers
                    .get(field)
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "Not specified".to_string());
                doc.push_str(&format!("| {label} | {} |\n", cell(&value)));
            }
            doc.push('\n');
        }
    }

    doc.push_str("## Your program\n\n");
    doc.push_str(text.trim());
    doc.push('\n');
    doc
}
