//! Result aggregation.
//!
//! Each aggregate carries a `count` so that per-frame sub-solve results
//! can be combined with `add` and then averaged with `divide`. The
//! command-level record renders as append-only `key=value` string fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::attr::AttrList;
use crate::data::PrintStatOptions;
use crate::frame::{FrameList, FrameNumber};
use crate::marker::MarkerList;
use crate::matrix_bool::MatrixBool3D;
use crate::relationships::ERRORS_PER_MARKER;
use crate::timer::SolverTimer;

/// Separator used inside compound result values.
const RESULT_SPLIT_CHAR: char = '#';

fn join_numbers<T: std::fmt::Display>(values: impl IntoIterator<Item = T>) -> String {
    let mut out = String::new();
    for value in values {
        if !out.is_empty() {
            out.push(RESULT_SPLIT_CHAR);
        }
        out.push_str(&value.to_string());
    }
    out
}

/// Scalar outcome of one kernel run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverResult {
    pub success: bool,
    pub error_avg: f64,
    pub error_min: f64,
    pub error_max: f64,
    pub reason_number: i32,
    pub reason: String,
    pub iterations: usize,
    pub function_evals: usize,
    pub jacobian_evals: usize,
    pub error_final: f64,
    pub user_interrupted: bool,
    /// Number of samples in this result.
    pub count: usize,
}

impl Default for SolverResult {
    fn default() -> Self {
        Self {
            success: true,
            error_avg: 0.0,
            error_min: f64::MAX,
            error_max: -0.0,
            reason_number: 0,
            reason: String::new(),
            iterations: 0,
            function_evals: 0,
            jacobian_evals: 0,
            error_final: 0.0,
            user_interrupted: false,
            count: 0,
        }
    }
}

impl SolverResult {
    pub fn add(&mut self, other: &SolverResult) {
        self.success = self.success && other.success;

        self.error_final += other.error_final;
        self.error_avg += other.error_avg;
        self.error_min = self.error_min.min(other.error_min);
        self.error_max = self.error_max.max(other.error_max);

        self.iterations += other.iterations;
        self.function_evals += other.function_evals;
        self.jacobian_evals += other.jacobian_evals;

        self.reason_number = other.reason_number;
        self.reason = other.reason.clone();
        self.user_interrupted = self.user_interrupted || other.user_interrupted;

        self.count += other.count;
    }

    pub fn divide(&mut self) {
        if self.count > 1 {
            let inverse = 1.0 / self.count as f64;
            self.error_avg *= inverse;
            self.error_final *= inverse;
        }
        self.count = 1;
    }

    pub fn append_string_fields(&self, out: &mut Vec<String>) {
        out.push(format!("success={}", self.success as i32));
        out.push(format!("reason_num={}", self.reason_number));
        out.push(format!("reason_string={}", self.reason));
        out.push(format!("error_final={}", self.error_final));
        out.push(format!("error_final_average={}", self.error_avg));
        out.push(format!("error_final_maximum={}", self.error_max));
        out.push(format!("error_final_minimum={}", self.error_min));
        out.push(format!("iteration_num={}", self.iterations));
        out.push(format!("iteration_function_num={}", self.function_evals));
        out.push(format!("iteration_jacobian_num={}", self.jacobian_evals));
        out.push(format!("user_interrupted={}", self.user_interrupted as i32));
    }
}

/// Wall-clock seconds and raw tick totals of the benchmark timers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimerResult {
    pub timer_solve: f64,
    pub timer_function: f64,
    pub timer_jacobian: f64,
    pub timer_parameter: f64,
    pub timer_error: f64,
    pub ticks_solve: u64,
    pub ticks_function: u64,
    pub ticks_jacobian: u64,
    pub ticks_parameter: u64,
    pub ticks_error: u64,
    pub count: usize,
}

impl TimerResult {
    pub fn fill(&mut self, timer: &SolverTimer) {
        self.timer_solve = timer.solve.seconds();
        self.timer_function = timer.function.seconds();
        self.timer_jacobian = timer.jacobian.seconds();
        self.timer_parameter = timer.parameter.seconds();
        self.timer_error = timer.error.seconds();
        self.ticks_solve = timer.solve.ticks();
        self.ticks_function = timer.function.ticks();
        self.ticks_jacobian = timer.jacobian.ticks();
        self.ticks_parameter = timer.parameter.ticks();
        self.ticks_error = timer.error.ticks();
        self.count = 1;
    }

    pub fn add(&mut self, other: &TimerResult) {
        self.timer_solve += other.timer_solve;
        self.timer_function += other.timer_function;
        self.timer_jacobian += other.timer_jacobian;
        self.timer_parameter += other.timer_parameter;
        self.timer_error += other.timer_error;
        self.ticks_solve += other.ticks_solve;
        self.ticks_function += other.ticks_function;
        self.ticks_jacobian += other.ticks_jacobian;
        self.ticks_parameter += other.ticks_parameter;
        self.ticks_error += other.ticks_error;
        self.count += other.count;
    }

    pub fn divide(&mut self) {
        // Timers accumulate; dividing a total would misreport the cost
        // of the combined solve.
        self.count = 1;
    }

    pub fn append_string_fields(&self, out: &mut Vec<String>) {
        out.push(format!("timer_solve={}", self.timer_solve));
        out.push(format!("timer_function={}", self.timer_function));
        out.push(format!("timer_jacobian={}", self.timer_jacobian));
        out.push(format!("timer_parameter={}", self.timer_parameter));
        out.push(format!("timer_error={}", self.timer_error));
        out.push(format!("ticks_solve={}", self.ticks_solve));
        out.push(format!("ticks_function={}", self.ticks_function));
        out.push(format!("ticks_jacobian={}", self.ticks_jacobian));
        out.push(format!("ticks_parameter={}", self.ticks_parameter));
        out.push(format!("ticks_error={}", self.ticks_error));
    }
}

/// The final parameter and residual vectors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SolveValuesResult {
    pub solve_parameter_list: Vec<f64>,
    pub solve_error_list: Vec<f64>,
    pub count: usize,
}

impl SolveValuesResult {
    pub fn fill(&mut self, parameters: &[f64], errors: &[f64]) {
        self.solve_parameter_list = parameters.to_vec();
        self.solve_error_list = errors.to_vec();
        self.count = 1;
    }

    pub fn add(&mut self, other: &SolveValuesResult) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            self.solve_parameter_list = other.solve_parameter_list.clone();
            self.solve_error_list = other.solve_error_list.clone();
            self.count = other.count;
            return;
        }
        let parameter_count = self
            .solve_parameter_list
            .len()
            .min(other.solve_parameter_list.len());
        for index in 0..parameter_count {
            self.solve_parameter_list[index] += other.solve_parameter_list[index];
        }
        let error_count = self.solve_error_list.len().min(other.solve_error_list.len());
        for index in 0..error_count {
            self.solve_error_list[index] += other.solve_error_list[index];
        }
        self.count += other.count;
    }

    pub fn divide(&mut self) {
        if self.count > 1 {
            let inverse = 1.0 / self.count as f64;
            for value in &mut self.solve_parameter_list {
                *value *= inverse;
            }
            for value in &mut self.solve_error_list {
                *value *= inverse;
            }
        }
        self.count = 1;
    }

    pub fn append_string_fields(&self, out: &mut Vec<String>) {
        out.push(format!(
            "solve_parameter_list={}",
            join_numbers(self.solve_parameter_list.iter())
        ));
        out.push(format!(
            "solve_error_list={}",
            join_numbers(self.solve_error_list.iter())
        ));
    }
}

/// Per-frame and per-marker-per-frame pixel deviations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorMetricsResult {
    /// Marker name to its (frame, deviation) samples.
    pub error_per_marker_per_frame: BTreeMap<String, Vec<(FrameNumber, f64)>>,
    /// Frame to deviation samples; averaged on `divide`.
    pub error_per_frame: BTreeMap<FrameNumber, Vec<f64>>,
}

impl ErrorMetricsResult {
    pub fn fill(
        &mut self,
        number_of_marker_errors: usize,
        markers: &MarkerList,
        frames: &FrameList,
        error_to_marker: &[(usize, usize)],
        error_distances: &[f64],
    ) {
        let pair_count = number_of_marker_errors / ERRORS_PER_MARKER;
        for pair_index in 0..pair_count {
            let (marker_index, frame_index) = error_to_marker[pair_index];
            let marker_name = markers.get_marker(marker_index).name.clone();
            let frame_number = frames.get_frame(frame_index);
            let deviation = error_distances[pair_index];

            self.error_per_marker_per_frame
                .entry(marker_name)
                .or_default()
                .push((frame_number, deviation));
            self.error_per_frame
                .entry(frame_number)
                .or_default()
                .push(deviation);
        }
    }

    pub fn add(&mut self, other: &ErrorMetricsResult) {
        for (marker_name, samples) in &other.error_per_marker_per_frame {
            self.error_per_marker_per_frame
                .entry(marker_name.clone())
                .or_default()
                .extend(samples.iter().copied());
        }
        for (frame_number, samples) in &other.error_per_frame {
            self.error_per_frame
                .entry(*frame_number)
                .or_default()
                .extend(samples.iter().copied());
        }
    }

    pub fn divide(&mut self) {
        for samples in self.error_per_frame.values_mut() {
            if samples.len() > 1 {
                let mean = samples.iter().sum::<f64>() / samples.len() as f64;
                samples.clear();
                samples.push(mean);
            }
        }
    }

    pub fn append_string_fields(&self, out: &mut Vec<String>) {
        for (marker_name, samples) in &self.error_per_marker_per_frame {
            for (frame_number, deviation) in samples {
                out.push(format!(
                    "error_per_marker_per_frame={marker_name}{RESULT_SPLIT_CHAR}\
                     {frame_number}{RESULT_SPLIT_CHAR}{deviation}"
                ));
            }
        }
        for (frame_number, samples) in &self.error_per_frame {
            let mean = if samples.is_empty() {
                0.0
            } else {
                samples.iter().sum::<f64>() / samples.len() as f64
            };
            out.push(format!(
                "error_per_frame={frame_number}{RESULT_SPLIT_CHAR}{mean}"
            ));
        }
    }
}

/// The collapsed marker-affects-attribute map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AffectsResult {
    pub marker_affects_attribute: Vec<(String, String, bool)>,
}

impl AffectsResult {
    pub fn fill(&mut self, markers: &MarkerList, attrs: &AttrList, cube: &MatrixBool3D) {
        self.marker_affects_attribute.clear();
        for (marker_index, marker) in markers.iter().enumerate() {
            for (attr_index, attr) in attrs.iter().enumerate() {
                let affects = (0..cube.depth())
                    .any(|frame_index| cube.at(marker_index, attr_index, frame_index));
                self.marker_affects_attribute.push((
                    marker.name.clone(),
                    attr.name().to_string(),
                    affects,
                ));
            }
        }
    }

    pub fn add(&mut self, other: &AffectsResult) {
        for entry in &other.marker_affects_attribute {
            if !self
                .marker_affects_attribute
                .iter()
                .any(|existing| existing.0 == entry.0 && existing.1 == entry.1)
            {
                self.marker_affects_attribute.push(entry.clone());
            }
        }
    }

    pub fn append_string_fields(&self, out: &mut Vec<String>) {
        for (marker_name, attr_name, affects) in &self.marker_affects_attribute {
            out.push(format!(
                "marker_affects_attribute={marker_name}{RESULT_SPLIT_CHAR}\
                 {attr_name}{RESULT_SPLIT_CHAR}{}",
                *affects as i32
            ));
        }
    }
}

/// Which solve objects ended up used or unused.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SolverObjectUsageResult {
    pub markers_used: Vec<String>,
    pub markers_unused: Vec<String>,
    pub attributes_used: Vec<String>,
    pub attributes_unused: Vec<String>,
}

impl SolverObjectUsageResult {
    pub fn fill(&mut self, markers: &MarkerList, attrs: &AttrList) {
        for (marker_index, marker) in markers.iter().enumerate() {
            if markers.get_enabled(marker_index) {
                self.markers_used.push(marker.name.clone());
            } else {
                self.markers_unused.push(marker.name.clone());
            }
        }
        for (attr_index, attr) in attrs.iter().enumerate() {
            if attrs.get_enabled(attr_index) {
                self.attributes_used.push(attr.name().to_string());
            } else {
                self.attributes_unused.push(attr.name().to_string());
            }
        }
    }

    pub fn add(&mut self, other: &SolverObjectUsageResult) {
        let extend_unique = |target: &mut Vec<String>, source: &[String]| {
            for name in source {
                if !target.contains(name) {
                    target.push(name.clone());
                }
            }
        };
        extend_unique(&mut self.markers_used, &other.markers_used);
        extend_unique(&mut self.markers_unused, &other.markers_unused);
        extend_unique(&mut self.attributes_used, &other.attributes_used);
        extend_unique(&mut self.attributes_unused, &other.attributes_unused);
    }

    pub fn append_string_fields(&self, out: &mut Vec<String>) {
        out.push(format!(
            "markers_used={}",
            join_numbers(self.markers_used.iter())
        ));
        out.push(format!(
            "markers_unused={}",
            join_numbers(self.markers_unused.iter())
        ));
        out.push(format!(
            "attributes_used={}",
            join_numbers(self.attributes_used.iter())
        ));
        out.push(format!(
            "attributes_unused={}",
            join_numbers(self.attributes_unused.iter())
        ));
    }
}

/// Raw input sizes of the prepared problem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SolverObjectCountResult {
    pub number_of_parameters: usize,
    pub number_of_errors: usize,
    pub number_of_marker_errors: usize,
    pub number_of_attr_stiffness_errors: usize,
    pub number_of_attr_smoothness_errors: usize,
    pub count: usize,
}

impl SolverObjectCountResult {
    pub fn fill(
        &mut self,
        number_of_parameters: usize,
        number_of_errors: usize,
        number_of_marker_errors: usize,
        number_of_attr_stiffness_errors: usize,
        number_of_attr_smoothness_errors: usize,
    ) {
        self.number_of_parameters = number_of_parameters;
        self.number_of_errors = number_of_errors;
        self.number_of_marker_errors = number_of_marker_errors;
        self.number_of_attr_stiffness_errors = number_of_attr_stiffness_errors;
        self.number_of_attr_smoothness_errors = number_of_attr_smoothness_errors;
        self.count = 1;
    }

    pub fn add(&mut self, other: &SolverObjectCountResult) {
        self.number_of_parameters += other.number_of_parameters;
        self.number_of_errors += other.number_of_errors;
        self.number_of_marker_errors += other.number_of_marker_errors;
        self.number_of_attr_stiffness_errors += other.number_of_attr_stiffness_errors;
        self.number_of_attr_smoothness_errors += other.number_of_attr_smoothness_errors;
        self.count += other.count;
    }

    pub fn divide(&mut self) {
        if self.count > 1 {
            self.number_of_parameters /= self.count;
            self.number_of_errors /= self.count;
            self.number_of_marker_errors /= self.count;
            self.number_of_attr_stiffness_errors /= self.count;
            self.number_of_attr_smoothness_errors /= self.count;
        }
        self.count = 1;
    }

    pub fn append_string_fields(&self, out: &mut Vec<String>) {
        out.push(format!("numberOfParameters={}", self.number_of_parameters));
        out.push(format!("numberOfErrors={}", self.number_of_errors));
        out.push(format!(
            "numberOfMarkerErrors={}",
            self.number_of_marker_errors
        ));
        out.push(format!(
            "numberOfAttrStiffnessErrors={}",
            self.number_of_attr_stiffness_errors
        ));
        out.push(format!(
            "numberOfAttrSmoothnessErrors={}",
            self.number_of_attr_smoothness_errors
        ));
    }
}

/// Frames the prepared problem considered valid or invalid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SolverFramesResult {
    pub total_frame_count: usize,
    pub valid_frames: Vec<FrameNumber>,
    pub invalid_frames: Vec<FrameNumber>,
}

impl SolverFramesResult {
    pub fn fill(&mut self, total_frame_count: usize, frames: &FrameList) {
        self.total_frame_count = total_frame_count;
        self.valid_frames.clear();
        self.invalid_frames.clear();
        for (_, frame_number, enabled) in frames.iter_all() {
            if enabled {
                self.valid_frames.push(frame_number);
            } else {
                self.invalid_frames.push(frame_number);
            }
        }
    }

    pub fn add(&mut self, other: &SolverFramesResult) {
        self.total_frame_count = self.total_frame_count.max(other.total_frame_count);
        for frame_number in &other.valid_frames {
            if !self.valid_frames.contains(frame_number) {
                self.valid_frames.push(*frame_number);
            }
            self.invalid_frames.retain(|f| f != frame_number);
        }
        for frame_number in &other.invalid_frames {
            if !self.valid_frames.contains(frame_number)
                && !self.invalid_frames.contains(frame_number)
            {
                self.invalid_frames.push(*frame_number);
            }
        }
        self.valid_frames.sort_unstable();
        self.invalid_frames.sort_unstable();
    }

    pub fn append_string_fields(&self, out: &mut Vec<String>) {
        out.push(format!(
            "valid_frames={}",
            join_numbers(self.valid_frames.iter())
        ));
        out.push(format!(
            "invalid_frames={}",
            join_numbers(self.invalid_frames.iter())
        ));
        out.push(format!("valid_frames_count={}", self.valid_frames.len()));
        out.push(format!(
            "invalid_frames_count={}",
            self.invalid_frames.len()
        ));
        out.push(format!("total_frame_count={}", self.total_frame_count));
    }
}

/// The full, append-only record of one solve invocation.
#[derive(Debug, Clone, Default)]
pub struct CommandResult {
    pub print_stats: PrintStatOptions,
    pub solver_result: SolverResult,
    pub timer_result: TimerResult,
    pub solve_values_result: SolveValuesResult,
    pub error_metrics_result: ErrorMetricsResult,
    pub affects_result: AffectsResult,
    pub solver_object_usage_result: SolverObjectUsageResult,
    pub solver_object_count_result: SolverObjectCountResult,
    pub solver_frames_result: SolverFramesResult,
}

impl CommandResult {
    /// Merge a per-frame sub-solve into this combined result.
    pub fn add(&mut self, other: &CommandResult) {
        self.solver_result.add(&other.solver_result);
        self.timer_result.add(&other.timer_result);
        self.solve_values_result.add(&other.solve_values_result);
        self.error_metrics_result.add(&other.error_metrics_result);
        self.affects_result.add(&other.affects_result);
        self.solver_object_usage_result
            .add(&other.solver_object_usage_result);
        self.solver_object_count_result
            .add(&other.solver_object_count_result);
        self.solver_frames_result.add(&other.solver_frames_result);
    }

    /// Turn accumulated sums into means.
    pub fn divide(&mut self) {
        self.solver_result.divide();
        self.timer_result.divide();
        self.solve_values_result.divide();
        self.error_metrics_result.divide();
        self.solver_object_count_result.divide();
    }

    /// Render the record as `key=value` string fields.
    pub fn as_string_fields(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.print_stats.input {
            self.solver_object_count_result.append_string_fields(&mut out);
        }
        if self.print_stats.used_solve_objects {
            self.solver_object_usage_result.append_string_fields(&mut out);
        }
        if self.print_stats.affects {
            self.affects_result.append_string_fields(&mut out);
        }
        self.solver_result.append_string_fields(&mut out);
        self.timer_result.append_string_fields(&mut out);
        self.error_metrics_result.append_string_fields(&mut out);
        self.solve_values_result.append_string_fields(&mut out);
        self.solver_frames_result.append_string_fields(&mut out);
        out
    }
}
