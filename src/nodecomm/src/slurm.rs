use std::collections::HashMap;
use std::env;

/// Snapshot of the `SLURM_*` variables a job step was started with.
#[derive(Debug, Clone, Default)]
pub struct Slurm {
    vars: HashMap<String, String>,
}

macro_rules! int_var {
    ($($(#[$doc:meta])* $name:ident => $key:literal),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $name(&self) -> Option<i64> {
                self.int($key)
            }
        )*
    };
}

macro_rules! string_var {
    ($($(#[$doc:meta])* $name:ident => $key:literal),* $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $name(&self) -> Option<&str> {
                self.string($key)
            }
        )*
    };
}

impl Slurm {
    pub fn from_env() -> Self {
        Self::from_vars(env::vars())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Slurm {
            vars: vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    fn string(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    fn int(&self, key: &str) -> Option<i64> {
        self.string(key).and_then(|v| v.trim().parse().ok())
    }

    pub fn is_running_under_slurm(&self) -> bool {
        self.vars.contains_key("SLURM_JOB_ID")
    }

    int_var! {
        job_id => "SLURM_JOB_ID",
        array_job_id => "SLURM_ARRAY_JOB_ID",
        array_task_id => "SLURM_ARRAY_TASK_ID",
        array_task_count => "SLURM_ARRAY_TASK_COUNT",
        array_task_min => "SLURM_ARRAY_TASK_MIN",
        array_task_max => "SLURM_ARRAY_TASK_MAX",
        array_task_step => "SLURM_ARRAY_TASK_STEP",
        job_num_nodes => "SLURM_JOB_NUM_NODES",
        /// Total number of tasks in the job
        ntasks => "SLURM_NTASKS",
        ntasks_per_node => "SLURM_NTASKS_PER_NODE",
        /// Node index relative to the allocation
        node_id => "SLURM_NODEID",
        /// Global task rank
        proc_id => "SLURM_PROCID",
        /// Task rank within the node
        local_id => "SLURM_LOCALID",
        cpus_per_task => "SLURM_CPUS_PER_TASK",
        cpus_on_node => "SLURM_CPUS_ON_NODE",
        /// Memory per node in MB
        mem_per_node => "SLURM_MEM_PER_NODE",
        /// Memory per CPU in MB
        mem_per_cpu => "SLURM_MEM_PER_CPU",
        gpus_on_node => "SLURM_GPUS_ON_NODE",
        gpus_per_task => "SLURM_GPUS_PER_TASK",
        restart_count => "SLURM_RESTART_COUNT",
        /// UNIX timestamp
        job_start_time => "SLURM_JOB_START_TIME",
        /// UNIX timestamp of the projected end
        job_end_time => "SLURM_JOB_END_TIME",
    }

    string_var! {
        job_name => "SLURM_JOB_NAME",
        job_partition => "SLURM_JOB_PARTITION",
        /// Allocated nodes in compressed form, e.g. `node[01-04]`
        job_node_list => "SLURM_JOB_NODELIST",
        node_name => "SLURMD_NODENAME",
        submit_host => "SLURM_SUBMIT_HOST",
        submit_dir => "SLURM_SUBMIT_DIR",
        stdout_path => "SLURM_JOB_STDOUT",
        stderr_path => "SLURM_JOB_STDERR",
        tasks_per_node => "SLURM_TASKS_PER_NODE",
        job_cpus_per_node => "SLURM_JOB_CPUS_PER_NODE",
        cuda_visible_devices => "CUDA_VISIBLE_DEVICES",
    }
}
