//! `runScript`: run a shell script given by `-script <path>`, passing every
//! other argument through.

use async_trait::async_trait;
use serde::Serialize;

use super::context::ProcessorContext;
use super::exe_based::{ExeBasedLifecycle, ExternalServiceLifecycle};
use super::script::ScriptWriter;
use crate::computation::{ComputationError, ComputationResult};
use crate::models::{ServiceArgDescriptor, ServiceData, ServiceMetaData};

pub const RUN_SCRIPT_SERVICE: &str = "runScript";
const SCRIPT_FLAG: &str = "-script";

/// Files produced by a script run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptOutput {
    pub output_files: Vec<String>,
}

/// Script path and pass-through arguments of a `runScript` service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptArgs {
    pub script: String,
    pub script_args: Vec<String>,
}

impl ScriptArgs {
    pub fn parse(service_data: &ServiceData) -> ComputationResult<Self> {
        let mut script = None;
        let mut script_args = Vec::new();
        let mut args = service_data.args.iter();
        while let Some(arg) = args.next() {
            if arg == SCRIPT_FLAG {
                let path = args.next().ok_or_else(|| {
                    ComputationError::processing(service_data, "-script requires a path")
                })?;
                script = Some(path.clone());
            } else {
                script_args.push(arg.clone());
            }
        }
        let script = script.ok_or_else(|| {
            ComputationError::processing(service_data, "missing required argument -script")
        })?;
        Ok(Self {
            script,
            script_args,
        })
    }
}

/// Built-in processor for `runScript`
#[derive(Debug, Clone, Default)]
pub struct RunScriptProcessor;

impl RunScriptProcessor {
    /// Lifecycle ready to be wrapped in a `LifeCycleServiceProcessor`
    pub fn lifecycle(
        runners: Vec<std::sync::Arc<dyn super::runners::ExternalProcessRunner>>,
    ) -> ExeBasedLifecycle<Self> {
        ExeBasedLifecycle::new(Self, runners)
    }
}

#[async_trait]
impl ExternalServiceLifecycle for RunScriptProcessor {
    type Output = ScriptOutput;

    fn metadata(&self) -> ServiceMetaData {
        ServiceMetaData::new(RUN_SCRIPT_SERVICE)
            .with_description("Run a shell script in the service working directory")
            .with_arg(ServiceArgDescriptor::new("-script", "path of the script to run").required())
    }

    fn prepare_external_script(
        &self,
        _ctx: &ProcessorContext,
        service_data: &ServiceData,
        script: &mut ScriptWriter,
    ) -> ComputationResult<()> {
        let args = ScriptArgs::parse(service_data)?;
        script
            .add_with_args("sh")
            .add_arg(&args.script)
            .add_args(&args.script_args)
            .end_args();
        Ok(())
    }

    async fn collect_result(
        &self,
        _ctx: &ProcessorContext,
        service_data: &ServiceData,
    ) -> ComputationResult<ScriptOutput> {
        let output_files = [&service_data.output_path, &service_data.error_path]
            .into_iter()
            .flatten()
            .cloned()
            .collect();
        Ok(ScriptOutput { output_files })
    }
}
