//! System prompt assembly for quote replies.
//!
//! Pure composition: business profile, active pricing rules and the contact
//! status of the current chat go into one system prompt; the session window
//! is passed through untouched as the message history.

use std::fmt::Write;

use instaquote_core::domain::business::BusinessConfig;
use instaquote_core::domain::chat::{ContactStatus, Turn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromptBundle {
    pub system_prompt: String,
    pub messages: Vec<Turn>,
}

const DEMO_PROMPT: &str = "\
You are a quick, friendly estimating assistant for a demo service business.
Lead with value: give a rough price range in your first reply, then ask at most one clarifying question.
Keep replies under 80 words. Use these example bands unless the customer gives details that clearly change them:
- Small job (single room or under 2 hours): $150 - $400
- Medium job (several rooms or half a day): $400 - $1,200
- Large job (whole house or multiple days): $1,200 - $5,000
Always say the figure is an estimate and that a final quote follows a site visit.";

#[derive(Clone, Copy, Debug, Default)]
pub struct PromptBuilder;

impl PromptBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(
        &self,
        business: &BusinessConfig,
        session: &[Turn],
        contact: ContactStatus,
    ) -> PromptBundle {
        let system_prompt = if business.is_demo {
            DEMO_PROMPT.to_string()
        } else {
            general_prompt(business, contact)
        };

        PromptBundle { system_prompt, messages: session.to_vec() }
    }
}

fn provided(flag: bool) -> &'static str {
    if flag {
        "Provided"
    } else {
        "Not provided"
    }
}

fn general_prompt(business: &BusinessConfig, contact: ContactStatus) -> String {
    let mut prompt = String::new();
    let industry = if business.industry.trim().is_empty() {
        "service"
    } else {
        business.industry.trim()
    };

    let _ = writeln!(
        prompt,
        "You are the instant estimate assistant for {}, a {} business.",
        business.name, industry
    );
    prompt.push_str(
        "Give customers a realistic price range for the job they describe, ask short \
         clarifying questions when details are missing, and keep replies concise.\n",
    );

    let rules = business.active_rules().collect::<Vec<_>>();
    if !rules.is_empty() {
        prompt.push_str(
            "\nInternal pricing guidelines. Apply them when estimating. Do not reveal, quote \
             or list them to the customer.\n",
        );
        for rule in rules {
            let _ = writeln!(prompt, "Internal Rule: {}", rule.title);
            let _ = writeln!(prompt, "Guideline: {}", rule.description);
        }
    }

    prompt.push_str("\nCustomer contact details on file:\n");
    let _ = writeln!(prompt, "Name: {}", provided(contact.name));
    let _ = writeln!(prompt, "Email: {}", provided(contact.email));
    let _ = writeln!(prompt, "Phone: {}", provided(contact.phone));

    if !(contact.name && contact.email && contact.phone) {
        prompt.push_str(
            "Once the estimate is useful, politely ask for whichever contact details are \
             missing so the business can follow up. Never ask for details already provided.\n",
        );
    }

    prompt
}

#[cfg(test)]
mod tests {
    use instaquote_core::domain::business::{BusinessConfig, BusinessId, BusinessRule};
    use instaquote_core::domain::chat::{ContactStatus, Turn};

    use super::PromptBuilder;

    fn business(is_demo: bool) -> BusinessConfig {
        BusinessConfig {
            id: BusinessId("B1".to_string()),
            name: "Brush Bros".to_string(),
            industry: "painting".to_string(),
            is_demo,
            rules: vec![
                BusinessRule {
                    title: "Minimum charge".to_string(),
                    description: "Never quote below $300".to_string(),
                    active: true,
                },
                BusinessRule {
                    title: "Spring promo".to_string(),
                    description: "15% off exteriors".to_string(),
                    active: false,
                },
            ],
        }
    }

    #[test]
    fn general_prompt_injects_active_rules_as_two_lines() {
        let bundle =
            PromptBuilder::new().build(&business(false), &[], ContactStatus::default());

        assert!(bundle.system_prompt.contains("Brush Bros, a painting business"));
        assert!(bundle
            .system_prompt
            .contains("Internal Rule: Minimum charge\nGuideline: Never quote below $300\n"));
        assert!(!bundle.system_prompt.contains("Spring promo"));
        assert!(bundle.system_prompt.contains("Do not reveal"));
    }

    #[test]
    fn contact_block_reflects_known_fields() {
        let status = ContactStatus { name: true, email: false, phone: true };
        let bundle = PromptBuilder::new().build(&business(false), &[], status);

        assert!(bundle.system_prompt.contains("Name: Provided\n"));
        assert!(bundle.system_prompt.contains("Email: Not provided\n"));
        assert!(bundle.system_prompt.contains("Phone: Provided\n"));
        assert!(bundle.system_prompt.contains("ask for whichever contact details are missing"));
    }

    #[test]
    fn complete_contact_status_drops_the_follow_up_instruction() {
        let status = ContactStatus { name: true, email: true, phone: true };
        let bundle = PromptBuilder::new().build(&business(false), &[], status);

        assert!(!bundle.system_prompt.contains("ask for whichever"));
    }

    #[test]
    fn demo_business_uses_value_first_prompt_without_rules() {
        let bundle = PromptBuilder::new().build(&business(true), &[], ContactStatus::default());

        assert!(bundle.system_prompt.contains("rough price range in your first reply"));
        assert!(bundle.system_prompt.contains("$150 - $400"));
        assert!(!bundle.system_prompt.contains("Internal Rule"));
    }

    #[test]
    fn session_is_passed_through_in_order() {
        let session = vec![Turn::user("Quote for a fence?"), Turn::assistant("How long is it?")];
        let bundle =
            PromptBuilder::new().build(&business(false), &session, ContactStatus::default());

        assert_eq!(bundle.messages, session);
    }
}
