//! The Jetson provisioning plan.
//!
//! Builds a [`PipelinePlan`] for one configuration database entry:
//!
//! | group            | steps                                                                    |
//! |------------------|--------------------------------------------------------------------------|
//! | prepare          | download, extract BSP and rootfs, apply vendor binaries, install overlays |
//! | images-phase-0   | image preparation hooks (only when the device is needed for images)      |
//! | gen-images       | initrd parameters, `l4t_initrd_flash.sh --no-flash`, cleanup hooks       |
//! | images-phase-1   | device-tied generation (only when the device is needed for images)       |
//! | odmfuse          | `flash-gen-prepare-odmfuse` hooks                                        |
//! | flash            | optional flash preparation, `l4t_initrd_flash.sh --flash-only`           |

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::config_db::ConfigMatch;
use crate::consts::INSTALL_OVERLAY_PREFIX;
use crate::exec::CommandSpec;
use crate::overlay::{CapabilitySet, InitrdParams, OverlayError, OverlayRegistry, Target, points};
use crate::paths;
use crate::pipeline::{GroupKind, PipelineError, PipelinePlan, PlannedStep, StepContext};
use crate::placeholder::KeyMap;
use crate::resources::{Downloader, Extractor, url_to_filename};

const INITRD_FLASH: &str = "./tools/kernel_flash/l4t_initrd_flash.sh";
const EXTERNAL_LAYOUT: &str = "tools/kernel_flash/flash_l4t_external.xml";

type JetsonContext<'s, 'r> = StepContext<'s, 'r, JetsonState>;

/// Values carried between steps of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JetsonState {
  /// Parameters contributed by `lt4-initrd-params` overlay functions.
  pub initrd: InitrdParams,
  /// Image types declared through `get-img-type`.
  pub img_types: Vec<String>,
  /// Result of `flash-gen-prepare-is-needed`.
  pub flash_prepare_needed: bool,
}

/// Directories used by one configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
  pub download_dir: PathBuf,
  pub config_dir: PathBuf,
  pub l4t_dir: PathBuf,
  pub rootfs_dir: PathBuf,
}

impl Layout {
  /// Layout under the working root from the environment.
  pub fn for_config(config_id: &str) -> Self {
    Self {
      download_dir: paths::download_dir(),
      config_dir: paths::config_dir(config_id),
      l4t_dir: paths::l4t_dir(config_id),
      rootfs_dir: paths::rootfs_dir(config_id),
    }
  }

  /// Layout under an explicit root.
  pub fn under(root: &Path, config_id: &str) -> Self {
    let config_dir = root.join("flash").join(config_id);
    let l4t_dir = config_dir.join("Linux_for_Tegra");
    Self {
      download_dir: root.join("downloads"),
      rootfs_dir: l4t_dir.join("rootfs"),
      l4t_dir,
      config_dir,
    }
  }
}

/// Builds the plan and key map for a Jetson configuration.
pub struct JetsonProvisioner<'p> {
  config: &'p ConfigMatch,
  layout: Layout,
  overlays_dir: PathBuf,
  overlay_args: Vec<(String, String)>,
  downloader: &'p dyn Downloader,
  extractor: &'p dyn Extractor,
  sudo: bool,
}

impl<'p> JetsonProvisioner<'p> {
  pub fn new(
    config: &'p ConfigMatch,
    layout: Layout,
    overlays_dir: impl Into<PathBuf>,
    downloader: &'p dyn Downloader,
    extractor: &'p dyn Extractor,
  ) -> Self {
    Self {
      config,
      layout,
      overlays_dir: overlays_dir.into(),
      overlay_args: Vec::new(),
      downloader,
      extractor,
      sudo: true,
    }
  }

  /// Named arguments passed to every overlay installer as `--key value`.
  pub fn with_overlay_args(mut self, args: Vec<(String, String)>) -> Self {
    self.overlay_args = args;
    self
  }

  /// Run vendor scripts through `sudo` (the default).
  pub fn with_sudo(mut self, sudo: bool) -> Self {
    self.sudo = sudo;
    self
  }

  pub fn layout(&self) -> &Layout {
    &self.layout
  }

  pub fn overlays(&self) -> &[String] {
    &self.config.entry.overlays
  }

  /// Registry with every overlay of this configuration registered, in
  /// configuration order.
  pub fn registry(&self) -> Result<OverlayRegistry, OverlayError> {
    let mut registry = OverlayRegistry::new(&self.overlays_dir, CapabilitySet::jetson());
    for name in self.overlays() {
      registry.register_overlay(name)?;
    }
    Ok(registry)
  }

  /// Identifier tokens of this configuration, including overlay arguments.
  pub fn identifier(&self) -> Vec<String> {
    let mut tokens = self.config.query.identifier();
    tokens.extend(self.overlay_args.iter().map(|(k, v)| format!("--{k}={v}")));
    tokens
  }

  /// Substitution table for overlay argument templates.
  pub fn keymap(&self) -> KeyMap {
    let query = &self.config.query;
    let mut keymap = KeyMap::new()
      .with("BOARD", &self.config.entry.board_config)
      .with("DEVICE", &query.device)
      .with("L4T_VERSION", &query.l4t_version)
      .with("HWREV", &query.board)
      .with("STORAGE", &query.storage)
      .with("ROOTFS_TYPE", &query.rootfs_type)
      .with("L4T_DIR", self.layout.l4t_dir.to_string_lossy())
      .with("ROOTFS_DIR", self.layout.rootfs_dir.to_string_lossy());
    if let Some(expansion) = &self.config.entry.board_expansion {
      keymap.insert("BOARD_EXPANSION", expansion);
    }
    keymap
  }

  fn is_external_storage(&self) -> bool {
    self.config.query.storage != "emmc"
  }

  fn privileged(&self, program: &str) -> CommandSpec {
    if self.sudo {
      CommandSpec::new("sudo").arg(program)
    } else {
      CommandSpec::new(program)
    }
  }

  fn archive_path(&self, url: &str) -> PathBuf {
    self.layout.download_dir.join(url_to_filename(url))
  }

  /// `l4t_initrd_flash.sh` invocation in `mode` with accumulated overlay
  /// parameters. Runs through a shell so overlay-provided quoting survives.
  fn initrd_flash(&self, mode: &str, params: &InitrdParams) -> CommandSpec {
    let mut words: Vec<&str> = Vec::new();
    if !params.env.is_empty() {
      words.push(&params.env);
    }
    words.push(INITRD_FLASH);
    words.push(mode);
    if self.is_external_storage() {
      words.extend(["--external-device", "nvme0n1p1", "-c", EXTERNAL_LAYOUT]);
    }
    if !params.args.is_empty() {
      words.push(&params.args);
    }
    words.push(&self.config.entry.board_config);
    words.push(if self.is_external_storage() { "internal" } else { "mmcblk0p1" });

    self
      .privileged("bash")
      .args(["-c".to_string(), words.join(" ")])
      .cwd(&self.layout.l4t_dir)
      .passthrough()
  }

  fn install_overlay(&self, ctx: &mut JetsonContext<'_, '_>, name: &str) -> Result<i32, PipelineError> {
    let script = self.overlays_dir.join(name).join("install.sh");
    if !script.exists() {
      info!(overlay = name, "overlay has no installer");
      return Ok(0);
    }

    let entry = &self.config.entry;
    let query = &self.config.query;
    let mut command = self.privileged(&script.to_string_lossy()).args([
      self.layout.rootfs_dir.to_string_lossy().into_owned(),
      query.device.clone(),
      query.l4t_version.clone(),
      query.board.clone(),
      entry.board_expansion.clone().unwrap_or_else(|| "none".to_string()),
      query.storage.clone(),
      query.rootfs_type.clone(),
    ]);
    for (key, value) in &self.overlay_args {
      command = command.arg(format!("--{key}")).arg(value);
    }

    Ok(ctx.runner.run(&command.cwd(self.overlays_dir.join(name)).passthrough())?.code)
  }

  fn prepare_steps(&'p self, plan: &mut PipelinePlan<'p, JetsonState>) {
    plan.push(
      GroupKind::Prepare,
      PlannedStep::new("download_resources", move |_: &mut JetsonContext<'_, '_>| {
        for url in [&self.config.entry.l4t, &self.config.entry.rootfs] {
          let dest = self.archive_path(url);
          if dest.exists() {
            debug!(path = %dest.display(), "already downloaded");
            continue;
          }
          self.downloader.download(url, &dest)?;
        }
        Ok(0)
      }),
    );
    plan.push(
      GroupKind::Prepare,
      PlannedStep::new("extract_l4t", move |_: &mut JetsonContext<'_, '_>| {
        self
          .extractor
          .extract(&self.archive_path(&self.config.entry.l4t), &self.layout.config_dir)?;
        Ok(0)
      }),
    );
    plan.push(
      GroupKind::Prepare,
      PlannedStep::new("extract_rootfs", move |_: &mut JetsonContext<'_, '_>| {
        self
          .extractor
          .extract(&self.archive_path(&self.config.entry.rootfs), &self.layout.rootfs_dir)?;
        Ok(0)
      }),
    );
    plan.push(
      GroupKind::Prepare,
      PlannedStep::new("apply_binaries", move |ctx: &mut JetsonContext<'_, '_>| {
        let command = self
          .privileged("./apply_binaries.sh")
          .cwd(&self.layout.l4t_dir)
          .passthrough();
        Ok(ctx.runner.run(&command)?.code)
      }),
    );
    for name in self.overlays() {
      plan.push(
        GroupKind::Prepare,
        PlannedStep::new(format!("{INSTALL_OVERLAY_PREFIX}{name}"), move |ctx: &mut JetsonContext<'_, '_>| {
          self.install_overlay(ctx, name)
        }),
      );
    }
  }

  fn image_steps(&'p self, plan: &mut PipelinePlan<'p, JetsonState>) {
    let split = self.config.entry.device_required_for_images;
    let (prep_group, device_group) = if split {
      (GroupKind::ImagesPhase0, GroupKind::ImagesPhase1)
    } else {
      (GroupKind::GenImages, GroupKind::GenImages)
    };

    plan.push(
      prep_group,
      PlannedStep::dispatch(points::IMG_GEN_INTERNAL_PREPARE, |ctx: &mut JetsonContext<'_, '_>| {
        let outcome =
          ctx
            .dispatcher
            .dispatch_cmd(ctx.store, ctx.group, points::IMG_GEN_INTERNAL_PREPARE, Target::All, &[])?;
        Ok(outcome.code_sum)
      }),
    );
    plan.push(
      prep_group,
      PlannedStep::dispatch(points::GET_IMG_TYPE, |ctx: &mut JetsonContext<'_, '_>| {
        ctx.state.img_types = ctx.dispatcher.collect_options(points::GET_IMG_TYPE, Target::All)?;
        info!(img_types = ?ctx.state.img_types, "image types");
        Ok(0)
      }),
    );
    plan.push(
      GroupKind::GenImages,
      PlannedStep::dispatch(points::IMG_GEN_INTERNAL, |ctx: &mut JetsonContext<'_, '_>| {
        let params =
          ctx
            .dispatcher
            .dispatch_initrd_params(ctx.store, ctx.group, points::IMG_GEN_INTERNAL, Target::All, &[])?;
        ctx.state.initrd.extend(params);
        Ok(0)
      }),
    );

    if split {
      plan.push(
        GroupKind::GenImages,
        PlannedStep::new("generate_images", move |ctx: &mut JetsonContext<'_, '_>| {
          let command = self.initrd_flash("--no-flash", &ctx.state.initrd);
          Ok(ctx.runner.run(&command)?.code)
        }),
      );
    }

    if self.is_external_storage() {
      plan.push(
        device_group,
        PlannedStep::dispatch(points::IMG_GEN_EXTERNAL, |ctx: &mut JetsonContext<'_, '_>| {
          let params =
            ctx
              .dispatcher
              .dispatch_initrd_params(ctx.store, ctx.group, points::IMG_GEN_EXTERNAL, Target::All, &[])?;
          ctx.state.initrd.extend(params);
          Ok(0)
        }),
      );
    }

    let final_generation = if split { "generate_images_device" } else { "generate_images" };
    plan.push(
      device_group,
      PlannedStep::new(final_generation, move |ctx: &mut JetsonContext<'_, '_>| {
        let command = self.initrd_flash("--no-flash", &ctx.state.initrd);
        Ok(ctx.runner.run(&command)?.code)
      }),
    );
    plan.push(
      device_group,
      PlannedStep::dispatch(points::IMG_GEN_CLEANUP, |ctx: &mut JetsonContext<'_, '_>| {
        let outcome = ctx
          .dispatcher
          .dispatch_cmd(ctx.store, ctx.group, points::IMG_GEN_CLEANUP, Target::All, &[])?;
        Ok(outcome.code_sum)
      }),
    );
  }

  fn flash_steps(&'p self, plan: &mut PipelinePlan<'p, JetsonState>) {
    plan.push(
      GroupKind::OdmFuse,
      PlannedStep::dispatch(points::FLASH_GEN_PREPARE_ODMFUSE, |ctx: &mut JetsonContext<'_, '_>| {
        let outcome =
          ctx
            .dispatcher
            .dispatch_cmd(ctx.store, ctx.group, points::FLASH_GEN_PREPARE_ODMFUSE, Target::All, &[])?;
        Ok(outcome.code_sum)
      }),
    );

    plan.push(
      GroupKind::Flash,
      PlannedStep::dispatch(points::FLASH_GEN_PREPARE_IS_NEEDED, |ctx: &mut JetsonContext<'_, '_>| {
        let outcome =
          ctx
            .dispatcher
            .dispatch_cmd(ctx.store, ctx.group, points::FLASH_GEN_PREPARE_IS_NEEDED, Target::All, &[])?;
        ctx.state.flash_prepare_needed = outcome.code_sum > 0;
        Ok(0)
      }),
    );
    plan.push(
      GroupKind::Flash,
      PlannedStep::dispatch(points::FLASH_GEN_PREPARE, |ctx: &mut JetsonContext<'_, '_>| {
        if !ctx.state.flash_prepare_needed {
          debug!("flash preparation not needed");
          return Ok(0);
        }
        let outcome = ctx
          .dispatcher
          .dispatch_cmd(ctx.store, ctx.group, points::FLASH_GEN_PREPARE, Target::All, &[])?;
        Ok(outcome.code_sum)
      }),
    );
    plan.push(
      GroupKind::Flash,
      PlannedStep::new("flash", move |ctx: &mut JetsonContext<'_, '_>| {
        let command = self.initrd_flash("--flash-only", &ctx.state.initrd);
        Ok(ctx.runner.run(&command)?.code)
      }),
    );
  }

  /// Full plan from preparation to flashing.
  pub fn plan(&'p self) -> PipelinePlan<'p, JetsonState> {
    let mut plan = PipelinePlan::new().require_device(GroupKind::Flash);
    self.prepare_steps(&mut plan);
    self.image_steps(&mut plan);
    self.flash_steps(&mut plan);
    plan
  }

  /// Preparation only, used to stage files without a device attached.
  pub fn prepare_plan(&'p self) -> PipelinePlan<'p, JetsonState> {
    let mut plan = PipelinePlan::new();
    self.prepare_steps(&mut plan);
    plan
  }
}
