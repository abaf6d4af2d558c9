use serde::{Deserialize, Serialize};

/// Sparse personalization profile derived from the query and session.
///
/// Every field is optional; an absent list means "no signal", never
/// "explicitly empty". Profiles accumulate across a session, so the type
/// supports an order-preserving union merge.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UserContext {
    pub dietary: DietaryContext,
    pub health: HealthContext,
    pub audience: Vec<String>,
    pub household: HouseholdContext,
    pub cooking: CookingContext,
    pub cultural: CulturalContext,
    pub occasion: Vec<String>,
    pub season: Option<String>,
    pub lifestyle: Vec<String>,
    pub fitness_context: Vec<String>,
    pub constraints: Vec<String>,
    pub budget: Option<String>,
    pub shopping: Vec<String>,
    pub storage: Vec<String>,
    pub available: Vec<String>,
    pub must_use: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DietaryContext {
    pub avoid: Vec<String>,
    pub preferences: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthContext {
    pub conditions: Vec<String>,
    pub goals: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HouseholdContext {
    pub size: Option<u32>,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CookingContext {
    pub skill: Option<String>,
    pub equipment: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CulturalContext {
    pub cuisines: Vec<String>,
    pub regions: Vec<String>,
}

impl UserContext {
    /// Merges `newer` onto `self`: list fields become order-preserving
    /// unions, scalar fields prefer the newer value when present.
    pub fn merge(&mut self, newer: &UserContext) {
        merge_lists(&mut self.dietary.avoid, &newer.dietary.avoid);
        merge_lists(&mut self.dietary.preferences, &newer.dietary.preferences);
        merge_lists(&mut self.health.conditions, &newer.health.conditions);
        merge_lists(&mut self.health.goals, &newer.health.goals);
        merge_lists(&mut self.audience, &newer.audience);
        merge_lists(&mut self.household.members, &newer.household.members);
        merge_lists(&mut self.cooking.equipment, &newer.cooking.equipment);
        merge_lists(&mut self.cultural.cuisines, &newer.cultural.cuisines);
        merge_lists(&mut self.cultural.regions, &newer.cultural.regions);
        merge_lists(&mut self.occasion, &newer.occasion);
        merge_lists(&mut self.lifestyle, &newer.lifestyle);
        merge_lists(&mut self.fitness_context, &newer.fitness_context);
        merge_lists(&mut self.constraints, &newer.constraints);
        merge_lists(&mut self.shopping, &newer.shopping);
        merge_lists(&mut self.storage, &newer.storage);
        merge_lists(&mut self.available, &newer.available);
        merge_lists(&mut self.must_use, &newer.must_use);

        if newer.season.is_some() {
            self.season.clone_from(&newer.season);
        }
        if newer.budget.is_some() {
            self.budget.clone_from(&newer.budget);
        }
        if newer.household.size.is_some() {
            self.household.size = newer.household.size;
        }
        if newer.cooking.skill.is_some() {
            self.cooking.skill.clone_from(&newer.cooking.skill);
        }
    }

    /// True when no dimension carries a signal.
    pub fn is_empty(&self) -> bool {
        self == &UserContext::default()
    }
}

fn merge_lists(target: &mut Vec<String>, incoming: &[String]) {
    for value in incoming {
        if !target.iter().any(|existing| existing.eq_ignore_ascii_case(value)) {
            target.push(value.clone());
        }
    }
}
