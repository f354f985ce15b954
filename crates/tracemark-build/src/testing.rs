//! Scripted collaborators for pipeline tests.

use std::fs;
use std::path::{Path, PathBuf};

use lopdf::{dictionary, Document, Object, Stream};
use tempfile::TempDir;
use tracemark_crypto::{ContentHasher, ProjectSecret};
use tracemark_ledger::InMemoryLedger;
use tracemark_mark::{DocumentMetadata, OverlaySpec, PageGeometry};
use tracemark_tools::{
    Availability, Compiler, DocumentRenderer, ExternalProtector, ExternalTool, Ghostscript,
    LopdfRenderer, ProtectorCapabilities, Rasterizer, ToolError, ToolVersion,
    CAPABILITIES_SCHEMA_VERSION,
};
use tracemark_types::{Classification, PendingRecord};
use uuid::Uuid;

use crate::pipeline::{BuildOrchestrator, BuildSettings};
use crate::request::BuildRequest;
use crate::stage::{BuildContext, BuildPaths};
use crate::tools::{ToolAvailability, Toolbox};

/// How a fake tool behaves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Behaviour {
    Works,
    Absent,
    Fails,
}

fn probe(behaviour: Behaviour, name: &str) -> Availability {
    match behaviour {
        Behaviour::Absent => Availability::Unavailable {
            reason: format!("{name} not found on PATH"),
        },
        _ => Availability::Available {
            path: PathBuf::from(format!("/usr/bin/{name}")),
            version: Some("1.0".into()),
        },
    }
}

fn unavailable(name: &str) -> ToolError {
    ToolError::Unavailable {
        tool: name.into(),
        reason: "not found on PATH".into(),
    }
}

fn failed(name: &str, detail: &str) -> ToolError {
    ToolError::Failed {
        tool: name.into(),
        status: "exit status: 2".into(),
        detail: detail.into(),
    }
}

/// A small A4 document with `pages` pages and no information dictionary.
pub(crate) fn write_sample_pdf(path: &Path, pages: usize) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });
    let mut kids = Vec::new();
    for n in 0..pages {
        let body = format!("BT /F1 12 Tf 72 720 Td (Section {n}) Tj ET");
        let content_id = doc.add_object(Stream::new(dictionary! {}, body.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}

// ---------------------------------------------------------------------------
// Fake tools
// ---------------------------------------------------------------------------

pub(crate) struct FakeCompiler(pub Behaviour);

impl ExternalTool for FakeCompiler {
    fn name(&self) -> &str {
        "fake-latex"
    }

    fn probe(&self) -> Availability {
        probe(self.0, self.name())
    }
}

impl Compiler for FakeCompiler {
    fn compile(&self, source: &Path, out_dir: &Path) -> Result<PathBuf, ToolError> {
        match self.0 {
            Behaviour::Absent => Err(unavailable(self.name())),
            Behaviour::Fails => Err(failed(self.name(), "! Undefined control sequence.")),
            Behaviour::Works => {
                fs::create_dir_all(out_dir)?;
                let stem = source.file_stem().unwrap_or_default().to_string_lossy();
                let pdf = out_dir.join(format!("{stem}.pdf"));
                write_sample_pdf(&pdf, 2);
                Ok(pdf)
            }
        }
    }
}

/// Writes a fresh document in place of the input, the way a real
/// rasterizer loses the information dictionary.
pub(crate) struct FakeRasterizer(pub Behaviour);

impl ExternalTool for FakeRasterizer {
    fn name(&self) -> &str {
        "fake-gs"
    }

    fn probe(&self) -> Availability {
        probe(self.0, self.name())
    }
}

impl Rasterizer for FakeRasterizer {
    fn rasterize(&self, input: &Path, dpi: u32) -> Result<PathBuf, ToolError> {
        match self.0 {
            Behaviour::Absent => Err(unavailable(self.name())),
            Behaviour::Fails => Err(failed(self.name(), "Unrecoverable error")),
            Behaviour::Works => {
                let output = Ghostscript::output_path(input, dpi);
                write_sample_pdf(&output, 2);
                Ok(output)
            }
        }
    }
}

/// External protector that encrypts through lopdf when it works.
pub(crate) struct FakeProtector(pub Behaviour);

impl ExternalTool for FakeProtector {
    fn name(&self) -> &str {
        "fake-qpdf"
    }

    fn probe(&self) -> Availability {
        probe(self.0, self.name())
    }
}

impl ExternalProtector for FakeProtector {
    fn capabilities(&self) -> Result<ProtectorCapabilities, ToolError> {
        Ok(ProtectorCapabilities {
            schema_version: CAPABILITIES_SCHEMA_VERSION,
            tool: self.name().into(),
            tool_version: ToolVersion::new(11, 9, 1),
            max_key_length: 256,
            argument_files: true,
        })
    }

    fn protect(&self, input: &Path, output: &Path, password: &str) -> Result<(), ToolError> {
        match self.0 {
            Behaviour::Absent => Err(unavailable(self.name())),
            Behaviour::Fails => Err(failed(self.name(), "unable to write output")),
            Behaviour::Works => LopdfRenderer::new().write_encrypted(input, output, password),
        }
    }
}

/// [`LopdfRenderer`] whose native encryption can be made to fail.
pub(crate) struct FlakyRenderer {
    inner: LopdfRenderer,
    native_fails: bool,
}

impl FlakyRenderer {
    pub(crate) fn native_fails() -> Self {
        Self {
            inner: LopdfRenderer::new(),
            native_fails: true,
        }
    }
}

impl DocumentRenderer for FlakyRenderer {
    fn page_geometry(&self, pdf: &Path) -> Result<Vec<PageGeometry>, ToolError> {
        self.inner.page_geometry(pdf)
    }

    fn apply_overlay(&self, pdf: &Path, overlay: &OverlaySpec) -> Result<(), ToolError> {
        self.inner.apply_overlay(pdf, overlay)
    }

    fn embed_metadata(&self, pdf: &Path, metadata: &DocumentMetadata) -> Result<(), ToolError> {
        self.inner.embed_metadata(pdf, metadata)
    }

    fn read_metadata(&self, pdf: &Path) -> Result<DocumentMetadata, ToolError> {
        self.inner.read_metadata(pdf)
    }

    fn write_encrypted(&self, input: &Path, output: &Path, password: &str) -> Result<(), ToolError> {
        if self.native_fails {
            return Err(ToolError::Pdf("encryption dictionary rejected".into()));
        }
        self.inner.write_encrypted(input, output, password)
    }

    fn write_decrypted(&self, input: &Path, output: &Path, password: &str) -> Result<(), ToolError> {
        self.inner.write_decrypted(input, output, password)
    }

    fn is_password_gated(&self, pdf: &Path, password: &str) -> Result<bool, ToolError> {
        self.inner.is_password_gated(pdf, password)
    }
}

pub(crate) fn toolbox(compiler: Behaviour, rasterizer: Behaviour, protector: Behaviour) -> Toolbox {
    Toolbox {
        compiler: Box::new(FakeCompiler(compiler)),
        renderer: Box::new(LopdfRenderer::new()),
        rasterizer: Box::new(FakeRasterizer(rasterizer)),
        protector: Some(Box::new(FakeProtector(protector))),
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

/// A temporary project: source file, in-memory ledger, secret, and tools.
pub(crate) struct Fixture {
    dir: TempDir,
    pub(crate) ledger: InMemoryLedger,
    pub(crate) secret: ProjectSecret,
    pub(crate) tools: Toolbox,
}

impl Fixture {
    pub(crate) fn new(tools: Toolbox) -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("doc.tex"),
            "\\documentclass{article}\\begin{document}Hi\\end{document}\n",
        )
        .unwrap();
        Self {
            dir,
            ledger: InMemoryLedger::new(),
            secret: ProjectSecret::from_bytes([42u8; 32]),
            tools,
        }
    }

    pub(crate) fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub(crate) fn source(&self) -> PathBuf {
        self.dir.path().join("doc.tex")
    }

    pub(crate) fn out_dir(&self) -> PathBuf {
        self.dir.path().join("build")
    }

    pub(crate) fn settings(&self) -> BuildSettings {
        BuildSettings {
            output_dir: self.out_dir(),
            default_classification: Classification::default(),
            raster_dpi: 150,
            operator: "tester@host".into(),
        }
    }

    pub(crate) fn orchestrator(&self) -> BuildOrchestrator<'_> {
        BuildOrchestrator::with_default_stages(&self.ledger, &self.tools, &self.secret, self.settings())
    }

    /// Put a compiled document at `work`, as the compile stage would.
    pub(crate) fn compile_into(&self, work: &Path) {
        fs::create_dir_all(work.parent().unwrap()).unwrap();
        write_sample_pdf(work, 2);
    }
}

/// A context positioned just after `SourceReady` for driving single stages.
pub(crate) fn context<'a>(
    fx: &'a Fixture,
    request: &'a BuildRequest,
    availability: &'a ToolAvailability,
) -> BuildContext<'a> {
    let out_dir = fx.out_dir();
    fs::create_dir_all(&out_dir).unwrap();
    let source = request.source();
    let mut record = PendingRecord::new(
        Uuid::now_v7(),
        Classification::from(Classification::SECRET),
        "tester@host",
        source.display().to_string(),
        ContentHasher::SOURCE.hash_file(source).unwrap(),
    );
    record.owner = request.owner.clone();
    record.purpose = request.purpose.clone();
    record.nudge = request.nudge.clone();
    BuildContext {
        request,
        tools: &fx.tools,
        availability,
        secret: &fx.secret,
        paths: BuildPaths::new(&out_dir, &request.stem(), request.protect),
        raster_dpi: 150,
        record,
        token: None,
        generated_password: None,
        protection: None,
        previous_stages: Vec::new(),
    }
}
