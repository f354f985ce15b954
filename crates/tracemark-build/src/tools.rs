use tracemark_tools::{
    Availability, Compiler, DocumentRenderer, ExternalProtector, ExternalTool, Ghostscript,
    LatexCompiler, LopdfRenderer, Qpdf, Rasterizer,
};
use tracing::debug;

use crate::config::ProjectConfig;
use crate::request::BuildRequest;

/// The collaborators a build runs against.
pub struct Toolbox {
    pub compiler: Box<dyn Compiler>,
    pub renderer: Box<dyn DocumentRenderer>,
    pub rasterizer: Box<dyn Rasterizer>,
    /// `None` leaves protection to the native path alone.
    pub protector: Option<Box<dyn ExternalProtector>>,
}

impl Toolbox {
    /// The concrete adapters configured for a project.
    pub fn from_config(config: &ProjectConfig) -> Self {
        Self {
            compiler: Box::new(LatexCompiler::new(
                config.latex.engine.clone(),
                config.latex.use_latexmk,
            )),
            renderer: Box::new(LopdfRenderer::new()),
            rasterizer: Box::new(Ghostscript::new(config.build.rasterizer.clone())),
            protector: config
                .protection
                .external_program()
                .map(|program| Box::new(Qpdf::new(program)) as Box<dyn ExternalProtector>),
        }
    }

    /// Probe every tool `request` needs. Called once per build; stages read
    /// the snapshot instead of probing again.
    pub fn probe(&self, request: &BuildRequest) -> ToolAvailability {
        ToolAvailability {
            compiler: probe_logged(self.compiler.as_ref()),
            rasterizer: request
                .rasterize
                .then(|| probe_logged(self.rasterizer.as_ref())),
            protector: match (&self.protector, request.protect) {
                (Some(protector), true) => Some(probe_logged(protector.as_ref())),
                _ => None,
            },
        }
    }
}

fn probe_logged<T: ExternalTool + ?Sized>(tool: &T) -> Availability {
    let availability = tool.probe();
    debug!(
        tool = tool.name(),
        available = availability.is_available(),
        "tool probed"
    );
    availability
}

/// Which tools could be used, as seen at the start of one build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolAvailability {
    pub compiler: Availability,
    /// `None` when rasterization was not requested.
    pub rasterizer: Option<Availability>,
    /// `None` when protection was not requested or no external tool is
    /// configured.
    pub protector: Option<Availability>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{toolbox, Behaviour};

    #[test]
    fn probes_only_requested_tools() {
        let tools = toolbox(Behaviour::Works, Behaviour::Works, Behaviour::Works);
        let snapshot = tools.probe(&BuildRequest::new("doc.tex"));
        assert!(snapshot.compiler.is_available());
        assert_eq!(snapshot.rasterizer, None);
        assert_eq!(snapshot.protector, None);
    }

    #[test]
    fn reports_missing_rasterizer() {
        let tools = toolbox(Behaviour::Works, Behaviour::Absent, Behaviour::Works);
        let snapshot = tools.probe(&BuildRequest::new("doc.tex").rasterize(None).protect(None));
        assert!(!snapshot.rasterizer.unwrap().is_available());
        assert!(snapshot.protector.unwrap().is_available());
    }

    #[test]
    fn config_without_external_tool() {
        let mut config = ProjectConfig::default();
        config.protection.external_tool = "none".into();
        let tools = Toolbox::from_config(&config);
        assert!(tools.protector.is_none());
        let snapshot = tools.probe(&BuildRequest::new("doc.tex").protect(None));
        assert_eq!(snapshot.protector, None);
    }
}
