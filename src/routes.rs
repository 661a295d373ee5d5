//! Static lookup tables from tool names to UI views, canvas modes, and the
//! persisted artifact each tool produces.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum View {
    Chat,
    Research,
    Branding,
    Website,
    Pricing,
    Leads,
    Outreach,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanvasMode {
    Preview,
    Code,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    MarketResearch,
    Branding,
    Website,
    Pricing,
    Leads,
    Outreach,
}

impl ArtifactType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MarketResearch => "market_research",
            Self::Branding => "branding",
            Self::Website => "website",
            Self::Pricing => "pricing",
            Self::Leads => "leads",
            Self::Outreach => "outreach",
        }
    }
}

impl std::fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Route {
    tool: &'static str,
    view: View,
    artifact: ArtifactType,
    canvas_on_start: Option<CanvasMode>,
    canvas_on_complete: Option<CanvasMode>,
    /// Persistence is known to trail the completion event.
    lagging: bool,
}

const ROUTES: &[Route] = &[
    Route {
        tool: "market_research",
        view: View::Research,
        artifact: ArtifactType::MarketResearch,
        canvas_on_start: None,
        canvas_on_complete: None,
        lagging: false,
    },
    Route {
        tool: "generate_branding",
        view: View::Branding,
        artifact: ArtifactType::Branding,
        canvas_on_start: None,
        canvas_on_complete: None,
        lagging: false,
    },
    Route {
        tool: "generate_website",
        view: View::Website,
        artifact: ArtifactType::Website,
        canvas_on_start: Some(CanvasMode::Code),
        canvas_on_complete: Some(CanvasMode::Preview),
        lagging: true,
    },
    Route {
        tool: "edit_website",
        view: View::Website,
        artifact: ArtifactType::Website,
        canvas_on_start: Some(CanvasMode::Code),
        canvas_on_complete: Some(CanvasMode::Preview),
        lagging: true,
    },
    Route {
        tool: "generate_pricing",
        view: View::Pricing,
        artifact: ArtifactType::Pricing,
        canvas_on_start: None,
        canvas_on_complete: None,
        lagging: false,
    },
    Route {
        tool: "generate_leads",
        view: View::Leads,
        artifact: ArtifactType::Leads,
        canvas_on_start: None,
        canvas_on_complete: None,
        lagging: false,
    },
    Route {
        tool: "generate_outreach",
        view: View::Outreach,
        artifact: ArtifactType::Outreach,
        canvas_on_start: None,
        canvas_on_complete: None,
        lagging: false,
    },
];

fn route(tool: &str) -> Option<&'static Route> {
    ROUTES.iter().find(|r| r.tool == tool)
}

pub fn view_for(tool: &str) -> Option<View> {
    route(tool).map(|r| r.view)
}

pub fn artifact_for(tool: &str) -> Option<ArtifactType> {
    route(tool).map(|r| r.artifact)
}

pub fn canvas_on_start(tool: &str) -> Option<CanvasMode> {
    route(tool).and_then(|r| r.canvas_on_start)
}

pub fn canvas_on_complete(tool: &str) -> Option<CanvasMode> {
    route(tool).and_then(|r| r.canvas_on_complete)
}

pub fn is_lagging(tool: &str) -> bool {
    route(tool).is_some_and(|r| r.lagging)
}

/// All tool names with a route.
pub fn known_tools() -> impl Iterator<Item = &'static str> {
    ROUTES.iter().map(|r| r.tool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn website_tools_switch_canvas_and_lag() {
        for tool in ["generate_website", "edit_website"] {
            assert_eq!(view_for(tool), Some(View::Website));
            assert_eq!(canvas_on_start(tool), Some(CanvasMode::Code));
            assert_eq!(canvas_on_complete(tool), Some(CanvasMode::Preview));
            assert!(is_lagging(tool));
        }
    }

    #[test]
    fn unknown_tool_has_no_route() {
        assert_eq!(view_for("tool_search"), None);
        assert_eq!(artifact_for("tool_search"), None);
        assert!(!is_lagging("tool_search"));
    }

    #[test]
    fn every_route_has_distinct_tool() {
        let mut names: Vec<_> = known_tools().collect();
        let before = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), before);
    }
}
