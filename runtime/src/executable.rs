//! Compiled module ready to run.
//!
//! One execution resolves every buffer allocation to device memory, binds
//! the output positions (reusing donated inputs where the module aliases
//! them), walks the thunk schedule across streams and finally frees the
//! temporaries that did not become part of the result.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use bon::bon;
use kiln_device::{DeviceMemory, Event, ScopedShapedBuffer, ShapedBuffer, Stream};
use kiln_hlo::HloModule;
use kiln_schedule::{BufferAllocation, BufferAssignment, OutputInfo, StreamAssignment, get_output_info};
use kiln_shape::{Shape, ShapeIndex};
use snafu::{OptionExt, ResultExt, ensure};
use tracing::{debug, instrument, trace, warn};

use crate::buffer_allocations::{BufferAllocations, ConstantGlobals};
use crate::config::ExecutionConfig;
use crate::constants::{ConstantCache, ConstantInfo};
use crate::error::*;
use crate::execution::{Arguments, ExecutionInput, ExecutionOutput, mark_to_be_released_arguments};
use crate::run_options::RunOptions;
use crate::thunk::{ExecuteParams, ThunkSequence};
use crate::thunk_schedule::ThunkSchedule;

pub struct Executable {
    module_name: String,
    output_shape: Shape,
    assignment: Arc<BufferAssignment>,
    output_info: BTreeMap<ShapeIndex, OutputInfo>,
    schedule: ThunkSchedule,
    constants: ConstantCache,
    binary: Arc<[u8]>,
    text: String,
    config: ExecutionConfig,
}

impl fmt::Debug for Executable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executable")
            .field("module_name", &self.module_name)
            .field("output_shape", &self.output_shape)
            .field("allocations", &self.assignment.allocations().len())
            .field("thunks", &self.schedule.total_order().len())
            .field("streams", &self.schedule.stream_count())
            .field("constants", &self.constants)
            .field("config", &self.config)
            .finish()
    }
}

#[bon]
impl Executable {
    #[builder]
    pub fn builder(
        #[builder(into)] module_name: String,
        output_shape: Shape,
        /// Allocations and the verbose dump reported on allocation failure.
        assignment: Arc<BufferAssignment>,
        output_info: BTreeMap<ShapeIndex, OutputInfo>,
        schedule: ThunkSchedule,
        #[builder(default)] constants: Vec<ConstantInfo>,
        #[builder(default, into)] binary: Arc<[u8]>,
        /// Textual form of the generated code.
        #[builder(default, into)]
        text: String,
        #[builder(default)] config: ExecutionConfig,
    ) -> Self {
        let constants = ConstantCache::new(constants, Arc::clone(&binary));
        Self { module_name, output_shape, assignment, output_info, schedule, constants, binary, text, config }
    }
}

impl Executable {
    /// Assembles an executable for `module` from its compilation results.
    ///
    /// Execution settings come from the environment.
    pub fn from_module(
        module: &HloModule,
        assignment: Arc<BufferAssignment>,
        thunks: ThunkSequence,
        stream_assignment: &StreamAssignment,
        constants: Vec<ConstantInfo>,
        binary: impl Into<Arc<[u8]>>,
    ) -> Result<Self> {
        assignment.verify_constants(module.entry_computation()).context(ScheduleSnafu)?;
        let output_info = get_output_info(module, &assignment).context(ScheduleSnafu)?;
        let schedule = ThunkSchedule::new(thunks, module.entry_computation(), stream_assignment)?;
        debug!(module = module.name(), schedule = %schedule, "assembled executable");
        Ok(Self::builder()
            .module_name(module.name())
            .output_shape(module.result_shape().clone())
            .assignment(assignment)
            .output_info(output_info)
            .schedule(schedule)
            .constants(constants)
            .binary(binary)
            .config(ExecutionConfig::from_env())
            .build())
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn output_shape(&self) -> &Shape {
        &self.output_shape
    }

    pub fn allocations(&self) -> &[BufferAllocation] {
        self.assignment.allocations()
    }

    pub fn output_info(&self) -> &BTreeMap<ShapeIndex, OutputInfo> {
        &self.output_info
    }

    pub fn schedule(&self) -> &ThunkSchedule {
        &self.schedule
    }

    pub fn constants(&self) -> &ConstantCache {
        &self.constants
    }

    pub fn binary(&self) -> &[u8] {
        &self.binary
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    /// Size of the binary plus the constants it carries, or -1 when only a
    /// textual form exists.
    pub fn size_of_generated_code_in_bytes(&self) -> i64 {
        if self.binary.is_empty() && !self.text.is_empty() {
            return -1;
        }
        let constants: usize =
            self.allocations().iter().filter(|allocation| allocation.is_constant()).map(BufferAllocation::size).sum();
        (self.binary.len() + constants) as i64
    }

    /// Runs the executable on `run_options`' stream and returns without
    /// waiting for the device unless synchronous execution is required.
    ///
    /// Output positions holding donated inputs are listed in the returned
    /// output's aliased indices; call [`ExecutionOutput::commit`] or
    /// [`ExecutionOutput::consume_result`] once the results are accepted.
    #[instrument(skip_all, fields(module = %self.module_name, device = run_options.device_ordinal()))]
    pub fn execute_async_on_stream(
        &self,
        run_options: &RunOptions,
        mut arguments: Arguments<'_>,
    ) -> Result<ExecutionOutput> {
        let stream = run_options.stream();
        let device_ordinal = stream.device_ordinal();
        let allocator = Arc::clone(run_options.allocator());

        let constants = self.constants.resolve(stream.as_ref())?;
        stream.wait_for_event(&constants.uploaded).context(DeviceSnafu)?;
        let mut buffers = self.generate_buffers(run_options, &arguments, &constants.globals)?;
        let mut output = ExecutionOutput::new(&self.output_shape, Arc::clone(&allocator), device_ordinal);

        let executed = self
            .bind_outputs(run_options, &mut arguments, &mut buffers, &mut output)
            .and_then(|donations| self.execute_thunks(run_options, &buffers).map(|()| donations));
        let live = live_addresses(output.result());
        let donations = match executed {
            Ok(donations) => donations,
            Err(error) => {
                if let Err(sync) = stream.parent().synchronize_all_activity() {
                    warn!(error = %sync, "failed to synchronize device after execution error");
                }
                if let Err(teardown) = buffers.tear_down(&live, self.allocations()) {
                    warn!(error = %teardown, "failed to release buffers after execution error");
                }
                return Err(error);
            }
        };

        buffers.tear_down(&live, self.allocations())?;

        // Donated buffers now backing outputs belong to the result.
        for (parameter, index) in &donations {
            if let Some(owned) = arguments.donatable_slot(*parameter, index)?.and_then(|slot| slot.release()) {
                owned.release();
            }
        }
        if let Arguments::Donated(inputs) = &mut arguments {
            mark_to_be_released_arguments(inputs, &mut output);
        }
        debug!(aliased = output.aliased_indices().len(), released = output.to_be_released().len(), "enqueued");
        Ok(output)
    }

    /// Runs with donatable inputs and waits for the results.
    pub fn execute_on_stream_with_inputs(
        &self,
        run_options: &RunOptions,
        mut inputs: Vec<ExecutionInput>,
    ) -> Result<ScopedShapedBuffer> {
        let output = self.execute_async_on_stream(run_options, Arguments::Donated(&mut inputs))?;
        self.block_until_done(run_options)?;
        Ok(output.consume_result())
    }

    /// Runs with borrowed arguments and waits for the results.
    pub fn execute_on_stream_borrowed(
        &self,
        run_options: &RunOptions,
        arguments: &[&ShapedBuffer],
    ) -> Result<ScopedShapedBuffer> {
        let output = self.execute_async_on_stream(run_options, Arguments::Borrowed(arguments))?;
        self.block_until_done(run_options)?;
        Ok(output.consume_result())
    }

    fn block_until_done(&self, run_options: &RunOptions) -> Result<()> {
        let stream = run_options.stream();
        stream.block_host_until_done().context(BlockHostSnafu { stream: stream.id() })
    }

    fn generate_buffers(
        &self,
        run_options: &RunOptions,
        arguments: &Arguments<'_>,
        globals: &ConstantGlobals,
    ) -> Result<BufferAllocations> {
        let dump = || self.assignment.to_verbose_string();
        BufferAllocations::generate()
            .allocations(self.allocations())
            .arguments(arguments)
            .globals(globals)
            .allocator(Arc::clone(run_options.allocator()))
            .device_ordinal(run_options.device_ordinal())
            .dump(&dump)
            .check_alignment(self.config.check_alignment)
            .call()
    }

    /// Sets every output position's address and returns the donated argument
    /// positions now backing outputs.
    ///
    /// An array output that lives in an entry parameter's allocation and was
    /// not donated gets a fresh buffer holding a copy of the parameter, also
    /// when it is a passthrough. The caller's argument is never handed out as
    /// part of the result.
    fn bind_outputs(
        &self,
        run_options: &RunOptions,
        arguments: &mut Arguments<'_>,
        buffers: &mut BufferAllocations,
        output: &mut ExecutionOutput,
    ) -> Result<Vec<(usize, ShapeIndex)>> {
        let is_entire_tuple_contents_aliased = output
            .result()
            .buffers()
            .leaves()
            .filter_map(|(index, _)| self.output_info.get(index))
            .all(|info| info.alias_config.is_some());

        let mut donations = Vec::new();
        for (index, info) in &self.output_info {
            let mut result_buffer = DeviceMemory::null();

            if let Some(alias) = &info.alias_config {
                let slot = arguments.donatable_slot(alias.parameter_number, &alias.parameter_index)?;
                let donated = slot.as_ref().is_some_and(|slot| slot.is_owning());
                ensure!(!alias.must_alias() || donated, MustAliasNotDonatedSnafu { allocation: info.allocation_index });

                if let Some(slot) = slot.filter(|slot| slot.is_owning()) {
                    result_buffer = slot.as_device_memory();
                    let address = result_buffer.address();
                    trace!(%index, parameter = alias.parameter_number, address, "reusing donated input");
                    donations.push((alias.parameter_number, alias.parameter_index.clone()));
                    output.add_aliased_index(index.clone());
                } else if !info.passthrough && !self.output_shape.subshape(index).context(ShapeSnafu)?.is_tuple() {
                    result_buffer = self.copy_protect(run_options, index, info, buffers, output)?;
                }
            }

            if result_buffer.is_null() {
                let from_parameter = self
                    .allocations()
                    .get(info.allocation_index)
                    .is_some_and(BufferAllocation::is_entry_computation_parameter);
                if from_parameter && !self.output_shape.subshape(index).context(ShapeSnafu)?.is_tuple() {
                    // An undonated parameter stays with the caller; the result owns a copy.
                    result_buffer = self.copy_protect(run_options, index, info, buffers, output)?;
                } else {
                    result_buffer = buffers.get_device_address(info.allocation_index)?;
                    // Every leaf aliased: no tuple was materialized at any level.
                    if is_entire_tuple_contents_aliased {
                        output.add_aliased_index(index.clone());
                    }
                }
            }
            output.mutable_result().set_buffer(index, result_buffer).context(DeviceSnafu)?;
        }
        Ok(donations)
    }

    /// Gives an aliased output whose input was not donated a fresh buffer
    /// holding a copy of the input, so the caller's argument stays intact.
    fn copy_protect(
        &self,
        run_options: &RunOptions,
        index: &ShapeIndex,
        info: &OutputInfo,
        buffers: &mut BufferAllocations,
        output: &mut ExecutionOutput,
    ) -> Result<DeviceMemory> {
        let size = self.output_shape.subshape(index).context(ShapeSnafu)?.byte_size();
        let aliased = buffers.get_device_address(info.allocation_index)?;
        ensure!(
            aliased.size() == size,
            AliasSizeMismatchSnafu { allocation: info.allocation_index, expected: size, actual: aliased.size() }
        );

        let fresh = run_options
            .allocator()
            .allocate(run_options.device_ordinal(), size)
            .with_context(|_| ResourceExhaustedSnafu { dump: self.assignment.to_verbose_string() })?;
        // The result owns the fresh buffer from here on, also if the copy fails.
        output.mutable_result().set_buffer(index, fresh).context(DeviceSnafu)?;
        debug!(%index, allocation = info.allocation_index, size, "copy-protecting aliased output");

        run_options.stream().memcpy_device_to_device(fresh, aliased, size).context(DeviceSnafu)?;
        let allocation = self
            .allocations()
            .get(info.allocation_index)
            .context(UnknownAllocationSnafu { index: info.allocation_index, count: self.allocations().len() })?;
        buffers.replace_device_address(allocation, fresh)?;
        Ok(fresh)
    }

    /// Enqueues every thunk in schedule order.
    fn execute_thunks(&self, run_options: &RunOptions, buffers: &BufferAllocations) -> Result<()> {
        let main = run_options.stream();
        let executor = main.parent();
        for thunk in self.schedule.total_order() {
            thunk.initialize(executor.as_ref())?;
        }

        let stream_count = self.schedule.stream_count();
        let mut sub_streams = Vec::with_capacity(stream_count - 1);
        if stream_count > 1 {
            let pool = run_options.stream_pool().context(MissingStreamPoolSnafu { streams: stream_count })?;
            for _ in 1..stream_count {
                let stream = pool.borrow_stream().context(DeviceSnafu)?;
                stream.wait_for_stream(main.as_ref()).context(DeviceSnafu)?;
                sub_streams.push(stream);
            }
        }

        let async_comms_stream = match run_options.stream_pool() {
            Some(pool) if self.schedule.needs_async_comms() => Some(pool.borrow_stream().context(DeviceSnafu)?),
            _ => None,
        };

        let thunks = self.schedule.total_order();
        let mut events: Vec<Option<Event>> = vec![None; thunks.len()];
        for (position, thunk) in thunks.iter().enumerate() {
            let stream_number = self.schedule.stream_number_for_thunk(position);
            let stream: &dyn Stream = match stream_number {
                0 => main.as_ref(),
                n => {
                    let stream = sub_streams.get(n - 1).context(MissingStreamPoolSnafu { streams: n + 1 })?;
                    &**stream
                }
            };

            for &dependency in self.schedule.depends_on(position) {
                let event = events[dependency].as_ref().context(MissingEventSnafu { thunk: position, dependency })?;
                stream.wait_for_event(event).context(DeviceSnafu)?;
            }

            ensure!(
                !thunk.kind().needs_async_comms_stream() || async_comms_stream.is_some(),
                MissingAsyncCommsStreamSnafu { thunk: thunk.info().profile_annotation.clone() }
            );

            debug!(
                thunk.index = position,
                thunk.kind = %thunk.kind(),
                thunk.name = %thunk.info(),
                stream = stream_number,
                "dispatching"
            );
            let params = ExecuteParams {
                run_options,
                buffer_allocations: buffers,
                stream,
                async_comms_stream: async_comms_stream.as_deref(),
            };
            thunk.execute_on_stream(&params)?;

            if self.schedule.depended(position) {
                events[position] = Some(stream.record_event().context(DeviceSnafu)?);
            }
        }

        for stream in &sub_streams {
            main.wait_for_stream(&**stream).context(DeviceSnafu)?;
        }
        if let Some(stream) = &async_comms_stream {
            main.wait_for_stream(&**stream).context(DeviceSnafu)?;
        }

        if self.config.force_synchronous || !run_options.allocator().allows_asynchronous_deallocation() {
            main.block_host_until_done().context(BlockHostSnafu { stream: main.id() })?;
        }
        Ok(())
    }
}

fn live_addresses(result: &ShapedBuffer) -> HashSet<usize> {
    result.buffers().iter().map(|(_, buffer)| buffer.address()).filter(|&address| address != 0).collect()
}
