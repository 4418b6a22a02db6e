//! The Tank: all imported documents for one compilation
//!
//! Exporters look FSH entities up by name or declared id. Name lookup is the
//! common case (`Parent: MyBaseProfile`, `InstanceOf: MyProfile`), id lookup
//! covers authors who reference by the artifact id instead.

use crate::ast::*;

/// Collection of all parsed documents for one compilation
#[derive(Debug, Default)]
pub struct FshTank {
    pub documents: Vec<Document>,
}

impl FshTank {
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.documents.iter().flat_map(|d| d.entities.iter())
    }

    pub fn profiles(&self) -> impl Iterator<Item = &Profile> {
        self.documents.iter().flat_map(|d| d.profiles())
    }

    pub fn extensions(&self) -> impl Iterator<Item = &Extension> {
        self.documents.iter().flat_map(|d| d.extensions())
    }

    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.documents.iter().flat_map(|d| d.instances())
    }

    pub fn value_sets(&self) -> impl Iterator<Item = &FshValueSet> {
        self.documents.iter().flat_map(|d| d.value_sets())
    }

    pub fn code_systems(&self) -> impl Iterator<Item = &FshCodeSystem> {
        self.documents.iter().flat_map(|d| d.code_systems())
    }

    pub fn find_profile(&self, name: &str) -> Option<&Profile> {
        self.profiles()
            .find(|p| p.name == name || p.id.as_deref() == Some(name))
    }

    pub fn find_extension(&self, name: &str) -> Option<&Extension> {
        self.extensions()
            .find(|x| x.name == name || x.id.as_deref() == Some(name))
    }

    pub fn find_instance(&self, name: &str) -> Option<&Instance> {
        self.instances()
            .find(|i| i.name == name || i.id.as_deref() == Some(name))
    }

    pub fn find_value_set(&self, name: &str) -> Option<&FshValueSet> {
        self.value_sets()
            .find(|v| v.name == name || v.id.as_deref() == Some(name))
    }

    pub fn find_code_system(&self, name: &str) -> Option<&FshCodeSystem> {
        self.code_systems()
            .find(|c| c.name == name || c.id.as_deref() == Some(name))
    }

    pub fn find_rule_set(&self, name: &str) -> Option<&RuleSet> {
        self.documents
            .iter()
            .flat_map(|d| d.rule_sets())
            .find(|r| r.name == name)
    }

    /// Whether any FSH entity claims this name (used to prefer FSH
    /// definitions over external ones during parent resolution)
    pub fn has_entity(&self, name: &str) -> bool {
        self.entities().any(|e| e.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Location;

    fn profile(name: &str, id: Option<&str>) -> Entity {
        Entity::Profile(Profile {
            name: name.to_string(),
            id: id.map(String::from),
            parent: Some("Observation".to_string()),
            title: None,
            description: None,
            rules: Vec::new(),
            location: Location::default(),
        })
    }

    #[test]
    fn finds_profile_by_name_and_id() {
        let mut doc = Document::new("a.fsh");
        doc.entities.push(profile("MyObs", Some("my-obs")));
        let tank = FshTank::new(vec![doc]);

        assert!(tank.find_profile("MyObs").is_some());
        assert!(tank.find_profile("my-obs").is_some());
        assert!(tank.find_profile("Nope").is_none());
        assert!(tank.has_entity("MyObs"));
    }
}
