//! Knowledge records. Records are immutable once loaded; every record carries
//! a stable `id` that joins retrieval, evidence and UI stages.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub frameworks: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub highlights: Vec<String>,
}

impl Project {
    /// Summary, description and highlights joined for indexing and digests.
    #[must_use]
    pub fn body(&self) -> String {
        join_nonempty(
            [self.summary.as_str(), self.description.as_str()]
                .into_iter()
                .chain(self.highlights.iter().map(String::as_str)),
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceKind {
    #[default]
    FullTime,
    PartTime,
    Contract,
    Freelance,
    Internship,
    Volunteer,
    Research,
    Other,
}

impl ExperienceKind {
    /// Paid or formal work positions.
    #[must_use]
    pub fn is_employment(self) -> bool {
        matches!(
            self,
            Self::FullTime | Self::PartTime | Self::Contract | Self::Freelance | Self::Internship
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experience {
    pub id: String,
    #[serde(default)]
    pub kind: ExperienceKind,
    pub company: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub bullets: Vec<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    /// Ids of projects built in this role.
    #[serde(default)]
    pub linked_projects: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Education {
    pub id: String,
    pub institution: String,
    pub degree: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeframe: Option<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub highlights: Vec<String>,
    #[serde(default)]
    pub skills: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Award {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proficiency: Option<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Discriminant of a [`ResumeEntry`], also used as a résumé search facet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeKind {
    Experience,
    Education,
    Award,
    Skill,
}

impl ResumeKind {
    pub const ALL: [Self; 4] = [Self::Experience, Self::Education, Self::Award, Self::Skill];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Experience => "experience",
            Self::Education => "education",
            Self::Award => "award",
            Self::Skill => "skill",
        }
    }

    /// Lenient facet parsing: plural forms and common synonyms are accepted.
    #[must_use]
    pub fn from_facet(facet: &str) -> Option<Self> {
        match facet.trim().to_lowercase().as_str() {
            "experience" | "experiences" | "work" | "job" | "jobs" | "employment" | "role"
            | "roles" => Some(Self::Experience),
            "education" | "degree" | "degrees" | "school" | "university" => Some(Self::Education),
            "award" | "awards" | "honor" | "honors" | "certification" | "certifications" => {
                Some(Self::Award)
            }
            "skill" | "skills" => Some(Self::Skill),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResumeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResumeEntry {
    Experience(Experience),
    Education(Education),
    Award(Award),
    Skill(Skill),
}

impl ResumeEntry {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Experience(e) => &e.id,
            Self::Education(e) => &e.id,
            Self::Award(a) => &a.id,
            Self::Skill(s) => &s.id,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ResumeKind {
        match self {
            Self::Experience(_) => ResumeKind::Experience,
            Self::Education(_) => ResumeKind::Education,
            Self::Award(_) => ResumeKind::Award,
            Self::Skill(_) => ResumeKind::Skill,
        }
    }

    /// Organization the entry belongs to.
    #[must_use]
    pub fn company_like(&self) -> Option<&str> {
        match self {
            Self::Experience(e) => Some(&e.company),
            Self::Education(e) => Some(&e.institution),
            Self::Award(a) => a.issuer.as_deref(),
            Self::Skill(_) => None,
        }
    }

    /// Headline of the entry: job title, degree, award or skill name.
    #[must_use]
    pub fn title_like(&self) -> &str {
        match self {
            Self::Experience(e) => &e.title,
            Self::Education(e) => &e.degree,
            Self::Award(a) => &a.title,
            Self::Skill(s) => &s.name,
        }
    }

    #[must_use]
    pub fn timeframe(&self) -> Option<&str> {
        match self {
            Self::Experience(e) => e.timeframe.as_deref(),
            Self::Education(e) => e.timeframe.as_deref(),
            Self::Award(a) => a.date.as_deref(),
            Self::Skill(_) => None,
        }
    }

    #[must_use]
    pub fn summary(&self) -> &str {
        match self {
            Self::Experience(e) => &e.summary,
            Self::Education(e) => &e.summary,
            Self::Award(a) => &a.summary,
            Self::Skill(s) => &s.summary,
        }
    }

    /// Skill-like keywords attached to the entry.
    #[must_use]
    pub fn skills(&self) -> &[String] {
        match self {
            Self::Experience(e) => &e.skills,
            Self::Education(e) => &e.skills,
            Self::Award(_) => &[],
            Self::Skill(s) => &s.keywords,
        }
    }

    #[must_use]
    pub fn linked_projects(&self) -> &[String] {
        match self {
            Self::Experience(e) => &e.linked_projects,
            Self::Education(_) | Self::Award(_) | Self::Skill(_) => &[],
        }
    }

    #[must_use]
    pub fn is_employment(&self) -> bool {
        match self {
            Self::Experience(e) => e.kind.is_employment(),
            Self::Education(_) | Self::Award(_) | Self::Skill(_) => false,
        }
    }

    /// Summary plus bullet points or highlights.
    #[must_use]
    pub fn body(&self) -> String {
        match self {
            Self::Experience(e) => e.body(),
            Self::Education(e) => e.body(),
            Self::Award(_) | Self::Skill(_) => self.summary().trim().to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub label: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default = "default_profile_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub headline: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub about: Vec<String>,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl Experience {
    #[must_use]
    pub fn body(&self) -> String {
        join_nonempty(
            std::iter::once(self.summary.as_str()).chain(self.bullets.iter().map(String::as_str)),
        )
    }
}

impl Education {
    #[must_use]
    pub fn body(&self) -> String {
        join_nonempty(
            std::iter::once(self.summary.as_str())
                .chain(self.highlights.iter().map(String::as_str)),
        )
    }
}

impl Profile {
    /// Headline, summary and about paragraphs.
    #[must_use]
    pub fn body(&self) -> String {
        join_nonempty(
            [self.headline.as_str(), self.summary.as_str()]
                .into_iter()
                .chain(self.about.iter().map(String::as_str)),
        )
    }
}

fn default_profile_id() -> String {
    "profile".into()
}

fn join_nonempty<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
