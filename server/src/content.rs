//! Content draw provider: random items from the static tables, excluding
//! already-used ids. Stateless beyond the caller-supplied exclusion set;
//! when a table is exhausted the exclusion is ignored so a long session
//! keeps drawing.
//!
//! The tables here are representative samples of the printed libraries;
//! the draw interface is what the engine depends on.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use shared::contracts::ContractCategory;
use shared::hiddenrole::{Mission, MissionCategory};
use shared::trivia::ChallengeKind;
use std::collections::HashSet;

pub struct ContractTemplate {
    pub id: &'static str,
    pub category: ContractCategory,
    pub visible: &'static str,
    pub hidden: &'static str,
    pub base_sips: u32,
    pub hidden_sips: u32,
}

macro_rules! contract {
    ($id:literal, $cat:ident, $visible:literal, $hidden:literal, $base:literal, $hidden_sips:literal) => {
        ContractTemplate {
            id: $id,
            category: ContractCategory::$cat,
            visible: $visible,
            hidden: $hidden,
            base_sips: $base,
            hidden_sips: $hidden_sips,
        }
    };
}

pub const CONTRACT_TEMPLATES: &[ContractTemplate] = &[
    contract!("bt-phone", BehaviorTrap, "I will not touch my phone this round", "Checking the time counts", 2, 1),
    contract!("bt-names", BehaviorTrap, "I will address everyone by full name", "Nicknames you invented count too", 2, 1),
    contract!("bt-laugh", BehaviorTrap, "I will keep a straight face this round", "A smirk counts as laughing", 2, 2),
    contract!("pr-spill", Prediction, "Someone will spill a drink before settlement", "A visible splash is enough", 2, 1),
    contract!("pr-song", Prediction, "Someone will start singing along before settlement", "Humming counts", 2, 1),
    contract!("pr-toilet", Prediction, "Nobody will leave the table this round", "Standing up counts as leaving", 3, 1),
    contract!("du-stare", Duel, "I will win a staring contest against the player on my left", "Blinking twice loses instantly", 2, 2),
    contract!("du-arm", Duel, "I will win rock-paper-scissors best of three against a witness", "A draw replays with your off hand", 2, 1),
    contract!("so-toast", Social, "I will deliver a toast mentioning every player by name", "Forgetting one name doubles your sips", 2, 2),
    contract!("so-story", Social, "I will tell an embarrassing story about myself", "The table votes whether it was embarrassing enough", 2, 1),
    contract!("so-compliment", Social, "I will compliment whoever speaks to me this round", "Sarcastic tone voids the compliment", 2, 1),
    contract!("mk-refill", Market, "I own the refills: I pour for anyone who asks", "Each pour adds one sip to your settlement", 1, 2),
    contract!("mk-broker", Market, "I will witness at least two other contracts this round", "Unwitnessed brokers pay double base", 1, 2),
    contract!("wc-accent", WildCard, "I will speak in an accent until settlement", "Dropping it even once matures this immediately", 2, 2),
    contract!("wc-hand", WildCard, "I will drink only with my off hand this round", "Pointing that out to others costs a sip each time", 2, 1),
    contract!("wc-rhyme", WildCard, "I will end one sentence per minute with a rhyme", "The table may demand a rhyme on the spot once", 2, 2),
    contract!("eg-all", Endgame, "Final round: I drink whenever anyone else drinks", "Cap still applies, lucky you", 3, 2),
    contract!("eg-silence", Endgame, "Final round: I stay silent until settlement", "Laughing counts as speaking", 3, 2),
    contract!("eg-double", Endgame, "Final round: my settlement counts toward the tab twice", "The second helping ignores your hedge", 2, 2),
];

pub const FINE_PRINT_TWISTS: &[&str] = &[
    "...but only while standing",
    "...and it must be announced in a whisper",
    "...unless a witness performs it first",
    "...retroactively, since the round began",
    "...and the signer must maintain eye contact while complying",
];

/// Balanced draw: pick categories round-robin at random so one offer never
/// stacks a single category. `category` restricts the pool (endgame round).
pub fn draw_contracts(
    rng: &mut StdRng,
    count: usize,
    exclude: &HashSet<String>,
    category: Option<ContractCategory>,
) -> Vec<&'static ContractTemplate> {
    let eligible = |t: &&ContractTemplate| match category {
        Some(c) => t.category == c,
        None => t.category != ContractCategory::Endgame,
    };
    let mut unused: Vec<&ContractTemplate> = CONTRACT_TEMPLATES
        .iter()
        .filter(eligible)
        .filter(|t| !exclude.contains(t.id))
        .collect();
    if unused.is_empty() {
        unused = CONTRACT_TEMPLATES.iter().filter(eligible).collect();
    }

    let mut drawn: Vec<&ContractTemplate> = Vec::with_capacity(count);
    while drawn.len() < count && !unused.is_empty() {
        let categories: Vec<ContractCategory> = {
            let mut seen = Vec::new();
            for t in &unused {
                if !seen.contains(&t.category) {
                    seen.push(t.category);
                }
            }
            seen
        };
        let pick_category = match categories.choose(rng) {
            Some(c) => *c,
            None => break,
        };
        let in_category: Vec<usize> = unused
            .iter()
            .enumerate()
            .filter(|(_, t)| t.category == pick_category)
            .map(|(i, _)| i)
            .collect();
        if let Some(&index) = in_category.as_slice().choose(rng) {
            drawn.push(unused.swap_remove(index));
        }
    }
    drawn
}

pub struct QuizQuestion {
    pub id: &'static str,
    pub question: &'static str,
    pub options: [&'static str; 4],
    pub answer: &'static str,
}

pub const QUIZ_QUESTIONS: &[QuizQuestion] = &[
    QuizQuestion {
        id: "q-capital-no",
        question: "What is the capital of Norway?",
        options: ["Bergen", "Oslo", "Trondheim", "Stavanger"],
        answer: "Oslo",
    },
    QuizQuestion {
        id: "q-planets",
        question: "How many planets are in the solar system?",
        options: ["7", "8", "9", "10"],
        answer: "8",
    },
    QuizQuestion {
        id: "q-bones",
        question: "Roughly how many bones does an adult human have?",
        options: ["106", "206", "306", "406"],
        answer: "206",
    },
    QuizQuestion {
        id: "q-pi",
        question: "What are the first three digits of pi?",
        options: ["3.41", "3.14", "3.12", "3.24"],
        answer: "3.14",
    },
    QuizQuestion {
        id: "q-ocean",
        question: "Which is the largest ocean?",
        options: ["Atlantic", "Indian", "Arctic", "Pacific"],
        answer: "Pacific",
    },
    QuizQuestion {
        id: "q-element",
        question: "What is the chemical symbol for gold?",
        options: ["Go", "Gd", "Au", "Ag"],
        answer: "Au",
    },
];

pub struct PromptTemplate {
    pub id: &'static str,
    pub kind: ChallengeKind,
    pub title: &'static str,
    pub description: &'static str,
}

macro_rules! prompt {
    ($id:literal, $kind:ident, $title:literal, $desc:literal) => {
        PromptTemplate {
            id: $id,
            kind: ChallengeKind::$kind,
            title: $title,
            description: $desc,
        }
    };
}

pub const PROMPTS: &[PromptTemplate] = &[
    prompt!("ss-opinion", SocialStudies, "Hot Take", "Defend an unpopular opinion for 30 seconds without laughing"),
    prompt!("ss-history", SocialStudies, "Origin Story", "Tell the group how you met the player to your right"),
    prompt!("pe-balance", PhysicalEducation, "Balance Beam", "Stand on one leg until the group counts to twenty"),
    prompt!("pe-plank", PhysicalEducation, "Plank Off", "Hold a plank for 30 seconds"),
    prompt!("dc-impression", DramaClass, "Impressions", "Impersonate another player until someone guesses who"),
    prompt!("dc-monologue", DramaClass, "Oscar Scene", "Perform a dramatic reading of your last text message"),
    prompt!("dt-silence", Detention, "Silent Treatment", "Stay completely silent until your next turn"),
    prompt!("dt-still", Detention, "Statue", "Do not move your hands until the next challenge starts"),
    prompt!("rc-swap", Recess, "Seat Swap", "Everyone moves one seat to the left; last to sit drinks"),
    prompt!("rc-high-five", Recess, "Round of Applause", "High-five every other player within 15 seconds"),
];

pub fn draw_quiz(rng: &mut StdRng, exclude: &HashSet<String>) -> &'static QuizQuestion {
    let unused: Vec<&QuizQuestion> = QUIZ_QUESTIONS
        .iter()
        .filter(|q| !exclude.contains(q.id))
        .collect();
    match unused.as_slice().choose(rng) {
        Some(q) => *q,
        None => &QUIZ_QUESTIONS[rng.gen_range(0..QUIZ_QUESTIONS.len())],
    }
}

pub fn draw_prompt(
    rng: &mut StdRng,
    kind: ChallengeKind,
    exclude: &HashSet<String>,
) -> Option<&'static PromptTemplate> {
    let pool: Vec<&PromptTemplate> = PROMPTS.iter().filter(|p| p.kind == kind).collect();
    if pool.is_empty() {
        return None;
    }
    let unused: Vec<&&PromptTemplate> = pool.iter().filter(|p| !exclude.contains(p.id)).collect();
    match unused.as_slice().choose(rng) {
        Some(p) => Some(**p),
        None => pool.as_slice().choose(rng).copied(),
    }
}

struct MissionTemplate {
    id: &'static str,
    category: MissionCategory,
    text: &'static str,
}

const MISSIONS: &[MissionTemplate] = &[
    MissionTemplate { id: "m-touch-glass", category: MissionCategory::Physical, text: "Touch three different players' glasses without comment" },
    MissionTemplate { id: "m-lights", category: MissionCategory::Physical, text: "Dim or flicker a light without being seen doing it" },
    MissionTemplate { id: "m-word-ghost", category: MissionCategory::Conversation, text: "Get someone to say the word 'ghost' unprompted" },
    MissionTemplate { id: "m-topic-weather", category: MissionCategory::Conversation, text: "Steer the conversation to the weather twice" },
    MissionTemplate { id: "m-mirror", category: MissionCategory::Reaction, text: "Mirror another player's posture for a full minute" },
    MissionTemplate { id: "m-freeze", category: MissionCategory::Reaction, text: "Freeze mid-sentence, then continue as if nothing happened" },
];

pub fn draw_mission(rng: &mut StdRng, exclude: &HashSet<String>) -> Mission {
    let unused: Vec<&MissionTemplate> =
        MISSIONS.iter().filter(|m| !exclude.contains(m.id)).collect();
    let template = match unused.as_slice().choose(rng) {
        Some(m) => *m,
        None => &MISSIONS[rng.gen_range(0..MISSIONS.len())],
    };
    Mission {
        id: template.id.to_string(),
        category: template.category,
        text: template.text.to_string(),
    }
}

pub const HOUSE_RULES: &[&str] = &[
    "No saying names: point instead",
    "Drink only with your left hand",
    "Every sentence must start with 'Honestly'",
    "No crossing your legs",
    "Thumbs must stay hidden while talking",
    "Address the host as 'Your Excellency'",
    "Whisper every question you ask",
    "Applaud whenever someone stands up",
];

pub fn draw_house_rule(rng: &mut StdRng, exclude: &HashSet<String>) -> &'static str {
    let unused: Vec<&&str> = HOUSE_RULES
        .iter()
        .filter(|r| !exclude.contains(**r))
        .collect();
    match unused.as_slice().choose(rng) {
        Some(r) => **r,
        None => HOUSE_RULES[rng.gen_range(0..HOUSE_RULES.len())],
    }
}

pub fn random_twist(rng: &mut StdRng) -> &'static str {
    FINE_PRINT_TWISTS[rng.gen_range(0..FINE_PRINT_TWISTS.len())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn contract_ids_are_unique() {
        let mut seen = HashSet::new();
        for t in CONTRACT_TEMPLATES {
            assert!(seen.insert(t.id), "duplicate template id {}", t.id);
        }
    }

    #[test]
    fn balanced_draw_respects_exclusions() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut exclude = HashSet::new();
        let first = draw_contracts(&mut rng, 3, &exclude, None);
        assert_eq!(first.len(), 3);
        for t in &first {
            assert_ne!(t.category, ContractCategory::Endgame);
            exclude.insert(t.id.to_string());
        }

        let second = draw_contracts(&mut rng, 3, &exclude, None);
        for t in &second {
            assert!(!exclude.contains(t.id));
        }
    }

    #[test]
    fn balanced_draw_spreads_categories() {
        // A single-category draw of three is possible but rare under the
        // round-robin pick; it must not be the common outcome.
        let mut collapsed = 0;
        for seed in 0..64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let drawn = draw_contracts(&mut rng, 3, &HashSet::new(), None);
            let categories: HashSet<_> = drawn.iter().map(|t| t.category).collect();
            if categories.len() == 1 {
                collapsed += 1;
            }
        }
        assert!(collapsed < 16, "category draw collapsed {} times", collapsed);
    }

    #[test]
    fn endgame_filter_only_yields_endgame() {
        let mut rng = StdRng::seed_from_u64(5);
        let drawn = draw_contracts(
            &mut rng,
            3,
            &HashSet::new(),
            Some(ContractCategory::Endgame),
        );
        assert!(!drawn.is_empty());
        assert!(drawn.iter().all(|t| t.category == ContractCategory::Endgame));
    }

    #[test]
    fn exhausted_pool_falls_back_to_repeats() {
        let mut rng = StdRng::seed_from_u64(11);
        let all: HashSet<String> = QUIZ_QUESTIONS.iter().map(|q| q.id.to_string()).collect();
        // Must still produce a question.
        let q = draw_quiz(&mut rng, &all);
        assert!(all.contains(q.id));
    }

    #[test]
    fn prompts_exist_for_every_non_quiz_kind() {
        let mut rng = StdRng::seed_from_u64(2);
        for kind in [
            ChallengeKind::SocialStudies,
            ChallengeKind::PhysicalEducation,
            ChallengeKind::DramaClass,
            ChallengeKind::Detention,
            ChallengeKind::Recess,
        ] {
            let prompt = draw_prompt(&mut rng, kind, &HashSet::new());
            assert!(prompt.is_some(), "no prompt for {:?}", kind);
        }
    }
}
