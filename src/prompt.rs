//! Brand-style prompt synthesis.
//!
//! Every prompt is the fixed Ikai Asai paragraph plus whatever the caller
//! supplied, laid out by one of the named [`PromptTemplate`]s. Free-text fields
//! go in verbatim; the image service does its own moderation.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, NoneAsEmptyString};
use thiserror::Error;

/// Aesthetic register appended to every prompt. Never modified by user input.
pub const BRAND_STYLE: &str = "handcrafted, minimalist design with an earthy aesthetic. \
The style draws inspiration from natural materials like ceramic, wood, and metal, \
emphasizing rustic, organic textures. Products are elegant, functional, and often presented \
in soft, natural lighting with a serene, contemporary feel, blending traditional Indian \
craftsmanship with modern sensibilities.";

pub const LIGHTING_CHOICES: [&str; 5] = [
    "Natural sunlight through window",
    "Soft diffused studio light",
    "Warm golden hour glow",
    "Dramatic side lighting",
    "Minimalist even lighting",
];

pub const BACKGROUND_CHOICES: [&str; 6] = [
    "Neutral beige",
    "Minimalist white",
    "Textured natural stone",
    "Warm wooden surface",
    "Soft gradient",
    "Muted earth tones",
];

pub const COMPOSITION_CHOICES: [&str; 5] = [
    "Centered isolated product",
    "Styled with complementary props",
    "Overhead flat lay",
    "45-degree angle view",
    "Multiple angles in composition",
];

pub const MOOD_CHOICES: [&str; 5] = [
    "Serene and calm",
    "Warm and inviting",
    "Elegant and sophisticated",
    "Rustic and authentic",
    "Minimalist and clean",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PromptError {
    #[error("validation error: {0}")]
    Validation(&'static str),
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Material {
    #[default]
    Ceramic,
    Wood,
    Metal,
    Stone,
    Glass,
    Terracotta,
    Bronze,
    Marble,
    Brass,
    Copper,
}

impl Material {
    pub const ALL: [Material; 10] = [
        Material::Ceramic,
        Material::Wood,
        Material::Metal,
        Material::Stone,
        Material::Glass,
        Material::Terracotta,
        Material::Bronze,
        Material::Marble,
        Material::Brass,
        Material::Copper,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Material::Ceramic => "ceramic",
            Material::Wood => "wood",
            Material::Metal => "metal",
            Material::Stone => "stone",
            Material::Glass => "glass",
            Material::Terracotta => "terracotta",
            Material::Bronze => "bronze",
            Material::Marble => "marble",
            Material::Brass => "brass",
            Material::Copper => "copper",
        }
    }
}

impl fmt::Display for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct ProductSpec {
    pub product_type: String,
    #[serde(default)]
    pub material: Material,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub additional_details: String,
}

impl ProductSpec {
    /// `a {color} {product_type} made of {material}[, size {size}][. {details}]`
    ///
    /// An empty color still leaves its slot in place; existing callers rely on
    /// the exact phrasing.
    pub fn product_clause(&self) -> String {
        let mut clause =
            format!("a {} {} made of {}", self.color, self.product_type, self.material);
        if !self.size.is_empty() {
            clause.push_str(", size ");
            clause.push_str(&self.size);
        }
        if !self.additional_details.is_empty() {
            clause.push_str(". ");
            clause.push_str(&self.additional_details);
        }
        clause
    }
}

/// Photography customization. Any of the fields may be absent; an empty string
/// from a form select counts as absent. Values outside the choice lists are
/// accepted as-is.
#[serde_as]
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct StyleOptions {
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub lighting: Option<String>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub background: Option<String>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub composition: Option<String>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(default)]
    pub mood: Option<String>,
}

impl StyleOptions {
    /// Chosen fields as `(label, value)` in prompt order.
    pub fn clauses(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("Lighting", &self.lighting),
            ("Background", &self.background),
            ("Composition", &self.composition),
            ("Mood", &self.mood),
        ]
        .into_iter()
        .filter_map(|(label, value)| match value.as_deref() {
            Some(v) if !v.is_empty() => Some((label, v)),
            _ => None,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TemplateId {
    /// `Create an image of ... Style: ...` with photography customization.
    #[default]
    Enhanced,
    /// `Product: ... Photography style: ...`, no customization.
    Brief,
    /// `Create an image of ... Style: ...`, no customization.
    Classic,
}

impl TemplateId {
    pub const ALL: [TemplateId; 3] =
        [TemplateId::Enhanced, TemplateId::Brief, TemplateId::Classic];

    pub fn template(self) -> &'static PromptTemplate {
        match self {
            TemplateId::Enhanced => &PromptTemplate::ENHANCED,
            TemplateId::Brief => &PromptTemplate::BRIEF,
            TemplateId::Classic => &PromptTemplate::CLASSIC,
        }
    }
}

/// Wording of one prompt layout:
/// `{lead}{subject}{style_label}{BRAND_STYLE}[ {Field}: {value}.]*`
#[derive(Debug)]
pub struct PromptTemplate {
    pub id: TemplateId,
    lead: &'static str,
    style_label: &'static str,
    style_clauses: bool,
}

impl PromptTemplate {
    pub const ENHANCED: PromptTemplate = PromptTemplate {
        id: TemplateId::Enhanced,
        lead: "Create an image of ",
        style_label: ". Style: ",
        style_clauses: true,
    };

    pub const BRIEF: PromptTemplate = PromptTemplate {
        id: TemplateId::Brief,
        lead: "Product: ",
        style_label: ". Photography style: ",
        style_clauses: false,
    };

    pub const CLASSIC: PromptTemplate = PromptTemplate {
        id: TemplateId::Classic,
        lead: "Create an image of ",
        style_label: ". Style: ",
        style_clauses: false,
    };

    pub fn render(&self, subject: &str, style: &StyleOptions) -> String {
        let mut out = String::with_capacity(
            self.lead.len() + subject.len() + self.style_label.len() + BRAND_STYLE.len() + 128,
        );
        out.push_str(self.lead);
        out.push_str(subject);
        out.push_str(self.style_label);
        out.push_str(BRAND_STYLE);
        if self.style_clauses {
            for (label, value) in style.clauses() {
                out.push_str(&format!(" {label}: {value}."));
            }
        }
        out
    }
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct ComposedPrompt {
    pub prompt: String,
    pub template: TemplateId,
}

pub fn compose(
    spec: &ProductSpec,
    style: &StyleOptions,
    template: TemplateId,
) -> Result<ComposedPrompt, PromptError> {
    if spec.product_type.is_empty() {
        return Err(PromptError::Validation("product type is required"));
    }
    let layout = template.template();
    let prompt = layout.render(&spec.product_clause(), style);
    Ok(ComposedPrompt { prompt, template: layout.id })
}

/// Wrap an already-written description in the classic brand wording.
pub fn enrich(text: &str) -> Result<ComposedPrompt, PromptError> {
    if text.is_empty() {
        return Err(PromptError::Validation("prompt text is required"));
    }
    let prompt = PromptTemplate::CLASSIC.render(text, &StyleOptions::default());
    Ok(ComposedPrompt { prompt, template: TemplateId::Classic })
}
